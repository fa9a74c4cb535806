//! The per-process local mirror and change detector.
//!
//! A mirror holds a private copy of the shared payload at the same offsets,
//! so the compiled node tree addresses both views. On demand it walks a
//! subtree, compares shared state against the copy with per-field
//! hysteresis, folds every change back into the copy, and reports the
//! changed values as a document shaped like the subtree.
//!
//! The mirror is single-owner: reads from shared state take the subtree
//! locks, writes to the private copy need none.

use serde_json::{Map, Value};

use crate::access;
use crate::node::{Node, NodeId};
use crate::schema::Kind;
use crate::store::{SemGuard, SharedTree};
use shmtree_primitives::PayloadBuf;

/// A private snapshot of a [`SharedTree`]'s payload with hysteresis-aware
/// change detection.
pub struct LocalMirror<'a> {
    shared: &'a SharedTree,
    local: PayloadBuf,
}

impl<'a> LocalMirror<'a> {
    /// Snapshot the current shared payload.
    pub fn new(shared: &'a SharedTree) -> Self {
        let local = PayloadBuf::new_zeroed(shared.payload_size());
        local.region().copy_from(&shared.region());
        Self { shared, local }
    }

    /// The store this mirror tracks.
    #[inline]
    pub fn store(&self) -> &'a SharedTree {
        self.shared
    }

    /// Resolve a path against the shared tree.
    #[inline]
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        self.shared.resolve(path)
    }

    /// Diff the subtree at `node` against the mirror, folding changes into
    /// the mirror and appending them to `out`.
    ///
    /// `out` must be an object or an array; changed members land under
    /// their names or positionally to match. A float counts as changed iff
    /// it moved by more than `hysteresis / 100`, an integer by more than
    /// `hysteresis`; booleans and strings on any difference. Returns true
    /// iff anything was appended.
    pub fn check_changes(&mut self, out: &mut Value, node: NodeId) -> bool {
        if !(out.is_object() || out.is_array()) {
            tracing::warn!("check_changes needs an object or array output document");
            return false;
        }
        self.check_node(out, node)
    }

    /// [`check_changes`](Self::check_changes) for a path, resolved against
    /// the shared tree.
    pub fn check_changes_at(&mut self, out: &mut Value, path: &str) -> bool {
        match self.shared.resolve(path) {
            Some(id) => self.check_changes(out, id),
            None => {
                tracing::warn!(path, "check_changes of unresolvable path");
                false
            }
        }
    }

    /// Refresh the mirror from shared state for the subtree at `node`,
    /// without diffing.
    pub fn refresh(&mut self, node: NodeId) {
        let shared = self.shared;
        let n = shared.tree().node(node);
        match n.kind {
            Kind::Unit | Kind::Array => {
                let tree = shared.tree();
                for &c in &tree.node(node).children {
                    self.refresh(c);
                }
            }
            _ => {
                let len = if n.kind == Kind::FixedStr {
                    n.size as usize
                } else {
                    n.kind.width() as usize
                };
                let Some(_g) = lock_shared(shared, n) else {
                    return;
                };
                self.local
                    .region()
                    .copy_range_from(&shared.region(), n.data_offset as usize, len);
            }
        }
    }

    /// Refresh the whole mirror.
    pub fn refresh_all(&mut self) {
        self.refresh(self.shared.tree().root());
    }

    fn check_node(&mut self, out: &mut Value, id: NodeId) -> bool {
        let shared = self.shared;
        let n = shared.tree().node(id);
        let off = n.data_offset as usize;
        let local = self.local.region();

        match n.kind {
            Kind::F64 => {
                let hyst = n.hysteresis as f64 / 100.0;
                let sh = {
                    let Some(_g) = lock_shared(shared, n) else {
                        return false;
                    };
                    shared.region().read_f64(off)
                };
                let mine = local.read_f64(off);
                if sh > mine + hyst || sh < mine - hyst {
                    local.write_f64(off, sh);
                    append(out, &n.name, Value::from(sh));
                    true
                } else {
                    false
                }
            }
            Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8 => {
                let hyst = n.hysteresis;
                let sh = {
                    let Some(_g) = lock_shared(shared, n) else {
                        return false;
                    };
                    access::load_as_i64(&shared.region(), n).unwrap_or(0)
                };
                let mine = access::load_as_i64(&local, n).unwrap_or(0);
                if sh > mine.saturating_add(hyst) || sh < mine.saturating_sub(hyst) {
                    access::store_i64(&local, n, sh);
                    append(out, &n.name, Value::from(sh));
                    true
                } else {
                    false
                }
            }
            Kind::Bool => {
                let sh = {
                    let Some(_g) = lock_shared(shared, n) else {
                        return false;
                    };
                    shared.region().read_u8(off)
                };
                if sh != local.read_u8(off) {
                    local.write_u8(off, sh);
                    append(out, &n.name, Value::Bool(sh != 0));
                    true
                } else {
                    false
                }
            }
            Kind::FixedStr => {
                let cap = n.size as usize;
                let Some(_g) = lock_shared(shared, n) else {
                    return false;
                };
                let sh = shared.region().read_cstr(off, cap);
                if sh != local.read_cstr(off, cap) {
                    local.write_cstr(off, cap, &sh);
                    append(out, &n.name, Value::String(sh));
                    true
                } else {
                    false
                }
            }
            Kind::Unit => {
                let mut sub = Value::Object(Map::new());
                let tree = shared.tree();
                for &c in &tree.node(id).children {
                    self.check_node(&mut sub, c);
                }
                if sub.as_object().is_some_and(|m| !m.is_empty()) {
                    append(out, &n.name, sub);
                    true
                } else {
                    false
                }
            }
            Kind::Array => {
                let mut sub = Value::Array(Vec::new());
                let tree = shared.tree();
                for &c in &tree.node(id).children {
                    self.check_node(&mut sub, c);
                }
                if sub.as_array().is_some_and(|a| !a.is_empty()) {
                    append(out, &n.name, sub);
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Take the subtree lock for a shared read, or log and give the field up.
///
/// A wait failure means the semaphore itself is broken; the mirror skips
/// the field rather than reading unlocked or posting a permit it never
/// acquired.
fn lock_shared<'t>(shared: &'t SharedTree, n: &Node) -> Option<SemGuard<'t>> {
    match shared.guard(n) {
        Ok(g) => Some(g),
        Err(e) => {
            tracing::error!(name = %n.name, error = %e, "subtree lock failed; field skipped");
            None
        }
    }
}

/// Append a changed value under its name (object output) or positionally
/// (array output).
fn append(out: &mut Value, name: &str, v: Value) {
    match out {
        Value::Object(map) => {
            map.insert(name.to_owned(), v);
        }
        Value::Array(items) => items.push(v),
        _ => unreachable!("output document shape checked at entry"),
    }
}
