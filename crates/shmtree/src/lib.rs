//! Schema-defined structured store in POSIX shared memory.
//!
//! A `shmtree` store is a fixed, typed, hierarchical data structure that
//! lives in a named shared-memory segment and survives any single process.
//! A JSON schema describes the hierarchy once; every attacher compiles the
//! same schema to the same deterministic layout, so a dotted path such as
//! `"config/motor/rev"` denotes the same bytes in every process.
//!
//! # Architecture
//!
//! ```text
//!   JSON schema ──> compiler ──> node tree + offset plan
//!                                   │
//!        ┌──────────────────────────┤
//!        │                          │
//!   ┌────┴─────┐   semaphores   ┌───┴────────┐
//!   │ process A│◄──────────────►│ process B  │
//!   └────┬─────┘   per subtree  └───┬────────┘
//!        │                          │
//!        └───────► shared segment ◄─┘
//!            header │ timestamps │ f64 │ i64 │ i32 │ i16 │ bytes │ strings
//! ```
//!
//! Exactly one attacher initializes a fresh segment with the schema's
//! defaults (guarded by an init semaphore and a validity header); everyone
//! else validates the header and attaches in place. Each unit or array in
//! the tree owns one named semaphore shared by all primitives below it,
//! and every primitive carries a monotonic millisecond update timestamp.
//!
//! # Reading and writing
//!
//! ```no_run
//! use shmtree::{Schema, SharedTree};
//!
//! let schema = Schema::from_value(serde_json::json!({
//!     "config": {
//!         "type": "unit",
//!         "rev": { "type": "int", "size": 4, "defaultValue": 7 }
//!     }
//! }))?;
//! let store = SharedTree::open(&schema, "/sysdata")?;
//!
//! let rev: i32 = store.read("config/rev", true).unwrap();
//! store.write("config/rev", rev + 1, true);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Change detection
//!
//! [`LocalMirror`] keeps a private copy of the payload and reports what
//! moved since the last query as a document, honoring each field's
//! `hysteresis` threshold:
//!
//! ```no_run
//! # let store: shmtree::SharedTree = unimplemented!();
//! use shmtree::LocalMirror;
//!
//! let mut mirror = LocalMirror::new(&store);
//! let mut diff = serde_json::json!({});
//! if mirror.check_changes(&mut diff, store.tree().root()) {
//!     println!("changed: {diff}");
//! }
//! ```

mod access;
mod bridge;
mod error;
mod header;
mod layout;
mod mirror;
mod node;
mod schema;
mod store;

pub use access::Scalar;
pub use error::{SchemaError, StoreError};
pub use layout::{HEADER_SIZE, OffsetPlan};
pub use mirror::LocalMirror;
pub use node::{LookupEntry, Node, NodeId, NodeTree};
pub use schema::{Kind, Schema};
pub use store::SharedTree;

// Re-export the building blocks callers need for raw access or tooling.
pub use shmtree_primitives::{NamedSemaphore, PayloadBuf, Region, ShmSegment, monotonic_ms};
