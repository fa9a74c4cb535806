//! Document bridge tests: materialize, bulk update, in-place sync.

mod common;

use common::Scratch;
use serde_json::json;
use shmtree::{Schema, SharedTree};

fn station_schema() -> Schema {
    Schema::from_value(json!({
        "status": {
            "type": "unit",
            "temperature": { "type": "float", "defaultValue": 20.0, "precision": 1 },
            "online": { "type": "bool", "defaultValue": false },
            "name": { "type": "string", "size": 16, "defaultValue": "north" }
        },
        "readings": {
            "type": "array",
            "0": { "type": "int", "size": 2, "defaultValue": 10 },
            "1": { "type": "int", "size": 2, "defaultValue": 20 }
        }
    }))
    .unwrap()
}

#[test]
fn to_document_materializes_defaults() {
    let scratch = Scratch::new("todoc");
    let store = SharedTree::open(&station_schema(), &scratch.segment).unwrap();

    let doc = store.to_document(store.tree().root());
    assert_eq!(
        doc,
        json!({
            "readings": [10, 20],
            "status": {
                "name": "north",
                "online": false,
                "temperature": 20.0
            }
        })
    );

    let status = store.resolve("status").unwrap();
    assert_eq!(
        store.to_document(status),
        json!({ "name": "north", "online": false, "temperature": 20.0 })
    );
}

#[test]
fn update_from_document_applies_matching_members() {
    let scratch = Scratch::new("fromdoc");
    let store = SharedTree::open(&station_schema(), &scratch.segment).unwrap();

    let changed = store.update_from_document(
        store.tree().root(),
        &json!({
            "status": {
                "temperature": 23.5,
                "online": true,
                "name": "south"
            },
            "readings": [11, 21, 31]
        }),
    );
    assert!(changed);

    assert_eq!(store.read::<f64>("status/temperature", true), Some(23.5));
    assert_eq!(store.read::<bool>("status/online", true), Some(true));
    assert_eq!(store.read::<String>("status/name", true).as_deref(), Some("south"));
    // positional, clipped to the shorter length
    assert_eq!(store.read::<i16>("readings/0", true), Some(11));
    assert_eq!(store.read::<i16>("readings/1", true), Some(21));
}

#[test]
fn update_from_document_skips_mismatched_members() {
    let scratch = Scratch::new("fromdoc_skip");
    let store = SharedTree::open(&station_schema(), &scratch.segment).unwrap();

    // wrong kinds everywhere except `online`
    let changed = store.update_from_document(
        store.tree().root(),
        &json!({
            "status": {
                "temperature": "hot",
                "online": true,
                "name": 9,
                "ghost": 1
            }
        }),
    );
    assert!(changed, "the one matching member still applies");
    assert_eq!(store.read::<f64>("status/temperature", true), Some(20.0));
    assert_eq!(store.read::<String>("status/name", true).as_deref(), Some("north"));
    assert_eq!(store.read::<bool>("status/online", true), Some(true));

    let all_wrong = store.update_from_document(
        store.tree().root(),
        &json!({ "status": { "temperature": "x" } }),
    );
    assert!(!all_wrong);
}

#[test]
fn sync_document_refreshes_scalars_in_place() {
    let scratch = Scratch::new("sync");
    let store = SharedTree::open(&station_schema(), &scratch.segment).unwrap();

    let mut doc = store.to_document(store.tree().root());
    assert!(!store.sync_document(&mut doc, store.tree().root()));

    store.write("status/temperature", 25.5f64, true);
    store.write("readings/1", 99i16, true);

    assert!(store.sync_document(&mut doc, store.tree().root()));
    assert_eq!(doc["status"]["temperature"], json!(25.5));
    assert_eq!(doc["readings"][1], json!(99));
    // untouched members keep their values
    assert_eq!(doc["status"]["name"], json!("north"));

    assert!(!store.sync_document(&mut doc, store.tree().root()));
}

#[test]
fn matches_document_compares_deeply() {
    let scratch = Scratch::new("equals");
    let store = SharedTree::open(&station_schema(), &scratch.segment).unwrap();

    let doc = store.to_document(store.tree().root());
    assert!(store.matches_document(store.tree().root(), &doc));

    let mut off_by_one = doc.clone();
    off_by_one["readings"][0] = json!(11);
    assert!(!store.matches_document(store.tree().root(), &off_by_one));

    let mut missing_member = doc.clone();
    missing_member["status"].as_object_mut().unwrap().remove("online");
    assert!(!store.matches_document(store.tree().root(), &missing_member));

    let mut wrong_kind = doc;
    wrong_kind["status"]["online"] = json!(1);
    assert!(!store.matches_document(store.tree().root(), &wrong_kind));
}
