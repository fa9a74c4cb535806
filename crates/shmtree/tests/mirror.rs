//! Local mirror and change-detection tests.

mod common;

use common::Scratch;
use serde_json::json;
use shmtree::{LocalMirror, Schema, SharedTree};

#[test]
fn float_hysteresis_gates_the_diff() {
    let scratch = Scratch::new("hyst_f");
    // hysteresis 50 means a threshold of 0.5
    let schema = Schema::from_value(json!({
        "temp": { "type": "float", "defaultValue": 20.0, "hysteresis": 50 }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);
    let root = store.tree().root();

    store.write("temp", 20.3f64, true);
    let mut out = json!({});
    assert!(!mirror.check_changes(&mut out, root));
    assert_eq!(out, json!({}));

    store.write("temp", 20.6f64, true);
    let mut out = json!({});
    assert!(mirror.check_changes(&mut out, root));
    assert_eq!(out, json!({ "temp": 20.6 }));

    // the mirror moved with the report
    let mut out = json!({});
    assert!(!mirror.check_changes(&mut out, root));
}

#[test]
fn integer_hysteresis_compares_absolute_difference() {
    let scratch = Scratch::new("hyst_i");
    let schema = Schema::from_value(json!({
        "level": { "type": "int", "size": 4, "defaultValue": 0, "hysteresis": 2 }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);
    let root = store.tree().root();

    store.write("level", 2i32, true);
    let mut out = json!({});
    assert!(!mirror.check_changes(&mut out, root), "|2 - 0| is not > 2");

    store.write("level", -3i32, true);
    let mut out = json!({});
    assert!(mirror.check_changes(&mut out, root));
    assert_eq!(out, json!({ "level": -3 }));
}

#[test]
fn booleans_and_strings_report_any_difference() {
    let scratch = Scratch::new("exact");
    let schema = Schema::from_value(json!({
        "armed": { "type": "bool", "defaultValue": false },
        "label": { "type": "string", "size": 12, "defaultValue": "idle" }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);
    let root = store.tree().root();

    store.write("armed", true, true);
    store.write("label", "running".to_owned(), true);

    let mut out = json!({});
    assert!(mirror.check_changes(&mut out, root));
    assert_eq!(out, json!({ "armed": true, "label": "running" }));
}

#[test]
fn unchanged_subtrees_are_pruned_from_the_diff() {
    let scratch = Scratch::new("prune");
    let schema = Schema::from_value(json!({
        "motor": {
            "type": "unit",
            "rpm": { "type": "int", "size": 4, "defaultValue": 0 },
            "temp": { "type": "float", "defaultValue": 30.0 }
        },
        "gps": {
            "type": "unit",
            "fix": { "type": "bool", "defaultValue": false }
        }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);
    let root = store.tree().root();

    store.write("motor/rpm", 1500i32, true);

    let mut out = json!({});
    assert!(mirror.check_changes(&mut out, root));
    assert_eq!(out, json!({ "motor": { "rpm": 1500 } }));
}

#[test]
fn array_changes_are_positional() {
    let scratch = Scratch::new("arraydiff");
    let schema = Schema::from_value(json!({
        "axes": {
            "type": "array",
            "0": { "type": "float", "defaultValue": 0.0 },
            "1": { "type": "float", "defaultValue": 0.0 },
            "2": { "type": "float", "defaultValue": 0.0 }
        }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);

    store.write("axes/2", 90.0f64, true);

    // diffing the array node into an array document appends positionally
    let axes = store.resolve("axes").unwrap();
    let mut out = json!([]);
    assert!(mirror.check_changes(&mut out, axes));
    assert_eq!(out, json!([90.0]));

    // via the root the array lands under its name
    store.write("axes/0", 15.0f64, true);
    let mut out = json!({});
    assert!(mirror.check_changes(&mut out, store.tree().root()));
    assert_eq!(out, json!({ "axes": [15.0] }));
}

#[test]
fn refresh_swallows_pending_changes() {
    let scratch = Scratch::new("refresh");
    let schema = Schema::from_value(json!({
        "counter": { "type": "int", "size": 8, "defaultValue": 0 }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);
    let root = store.tree().root();

    store.write("counter", 41i64, true);
    mirror.refresh_all();

    let mut out = json!({});
    assert!(!mirror.check_changes(&mut out, root));

    store.write("counter", 42i64, true);
    let counter = store.resolve("counter").unwrap();
    mirror.refresh(counter);
    assert!(!mirror.check_changes(&mut out, root));
}

#[test]
fn check_changes_rejects_scalar_output_documents() {
    let scratch = Scratch::new("badout");
    let schema = Schema::from_value(json!({
        "x": { "type": "int", "size": 4, "defaultValue": 0 }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);

    store.write("x", 1i32, true);
    let mut out = json!(0);
    assert!(!mirror.check_changes(&mut out, store.tree().root()));
    assert_eq!(out, json!(0));
}

#[test]
fn check_changes_at_resolves_subtrees() {
    let scratch = Scratch::new("checkat");
    let schema = Schema::from_value(json!({
        "a": {
            "type": "unit",
            "v": { "type": "int", "size": 4, "defaultValue": 0 }
        },
        "b": {
            "type": "unit",
            "v": { "type": "int", "size": 4, "defaultValue": 0 }
        }
    }))
    .unwrap();
    let store = SharedTree::open(&schema, &scratch.segment).unwrap();
    let mut mirror = LocalMirror::new(&store);

    store.write("a/v", 5i32, true);
    store.write("b/v", 6i32, true);

    // scoped to `a`, the diff neither reports nor consumes `b`
    let mut out = json!({});
    assert!(mirror.check_changes_at(&mut out, "a"));
    assert_eq!(out, json!({ "a": { "v": 5 } }));

    let mut out = json!({});
    assert!(mirror.check_changes(&mut out, store.tree().root()));
    assert_eq!(out, json!({ "b": { "v": 6 } }));
}
