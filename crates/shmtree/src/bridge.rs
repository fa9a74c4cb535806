//! The document bridge: moving whole subtrees between the store and
//! hierarchical JSON values.
//!
//! Three directions: [`to_document`](SharedTree::to_document) materializes
//! a subtree, [`update_from_document`](SharedTree::update_from_document)
//! applies a document to the store, and
//! [`sync_document`](SharedTree::sync_document) refreshes an existing
//! document's scalars in place. All of them lock per primitive, never
//! across a subtree, so no call path ever holds two semaphores.

use serde_json::{Map, Value};

use crate::access::{parse_i64_auto, parse_f64_prefix};
use crate::node::NodeId;
use crate::schema::Kind;
use crate::store::SharedTree;

// ── scalar coercions from document values ──────────────────────────────────

pub(crate) fn json_to_i64(v: &Value) -> i64 {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .unwrap_or_else(|| n.as_f64().map(|f| f.round() as i64).unwrap_or(0)),
        Value::Bool(b) => *b as i64,
        Value::String(s) => parse_i64_auto(s),
        _ => 0,
    }
}

pub(crate) fn json_to_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        Value::String(s) => parse_f64_prefix(s),
        _ => 0.0,
    }
}

pub(crate) fn json_to_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

pub(crate) fn json_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "True" } else { "False" }.to_owned(),
        _ => String::new(),
    }
}

fn is_int_number(v: &Value) -> bool {
    matches!(v, Value::Number(n) if n.as_i64().is_some() || n.as_u64().is_some())
}

fn is_float_number(v: &Value) -> bool {
    matches!(v, Value::Number(n) if n.as_f64().is_some() && n.as_i64().is_none() && n.as_u64().is_none())
}

impl SharedTree {
    /// Materialize the subtree rooted at `node` as a document.
    ///
    /// Primitives become typed scalars, units become objects with children
    /// in name order, arrays become sequences. Each primitive is read under
    /// its subtree lock.
    pub fn to_document(&self, node: NodeId) -> Value {
        let n = self.tree().node(node);
        match n.kind {
            Kind::Unit => {
                let mut map = Map::new();
                for &c in &n.children {
                    map.insert(self.tree().node(c).name.clone(), self.to_document(c));
                }
                Value::Object(map)
            }
            Kind::Array => {
                Value::Array(n.children.iter().map(|&c| self.to_document(c)).collect())
            }
            Kind::F64 => Value::from(self.value::<f64>(node, true).unwrap_or(0.0)),
            Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8 => {
                Value::from(self.value::<i64>(node, true).unwrap_or(0))
            }
            Kind::Bool => Value::Bool(self.value::<bool>(node, true).unwrap_or(false)),
            Kind::FixedStr => {
                Value::String(self.value::<String>(node, true).unwrap_or_default())
            }
        }
    }

    /// Walk `doc` and the subtree at `node` in lockstep, applying every
    /// compatible scalar.
    ///
    /// Object members are matched to unit children by exact name; array
    /// elements positionally, up to the shorter of the two lengths. A
    /// member of the wrong kind is skipped (logged at debug); the return is
    /// true iff at least one field was stored.
    pub fn update_from_document(&self, node: NodeId, doc: &Value) -> bool {
        let n = self.tree().node(node);
        match (n.kind, doc) {
            (Kind::Unit, Value::Object(map)) => {
                let mut any = false;
                for (key, member) in map {
                    match self.tree().child_named(node, key) {
                        Some(child) => {
                            if self.update_from_document(child, member) {
                                any = true;
                            }
                        }
                        None => {
                            tracing::debug!(name = %n.name, key = %key, "document member has no node");
                        }
                    }
                }
                any
            }
            (Kind::Array, Value::Array(items)) => {
                let mut any = false;
                for (item, &child) in items.iter().zip(&n.children) {
                    if self.update_from_document(child, item) {
                        any = true;
                    }
                }
                any
            }
            (Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8, v) if is_int_number(v) => {
                self.update(node, json_to_i64(v), true)
            }
            (Kind::F64, v) if is_float_number(v) => self.update(node, json_to_f64(v), true),
            (Kind::Bool, Value::Bool(b)) => self.update(node, *b, true),
            (Kind::FixedStr, Value::String(s)) => self.update(node, s.clone(), true),
            _ => {
                tracing::debug!(name = %n.name, kind = %n.kind, "document member kind mismatch");
                false
            }
        }
    }

    /// Overwrite the scalars of an existing document from shared state.
    ///
    /// The document keeps its shape; only members whose kind matches the
    /// corresponding node are compared and, when different, replaced.
    /// Returns true iff any scalar changed.
    pub fn sync_document(&self, doc: &mut Value, node: NodeId) -> bool {
        let n = self.tree().node(node);
        match n.kind {
            Kind::Unit => {
                let Value::Object(map) = doc else { return false };
                let mut any = false;
                for (key, member) in map.iter_mut() {
                    if let Some(child) = self.tree().child_named(node, key)
                        && self.sync_document(member, child)
                    {
                        any = true;
                    }
                }
                any
            }
            Kind::Array => {
                let Value::Array(items) = doc else { return false };
                let mut any = false;
                for (i, item) in items.iter_mut().enumerate() {
                    if let Some(child) = self.tree().child_at(node, i)
                        && self.sync_document(item, child)
                    {
                        any = true;
                    }
                }
                any
            }
            Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8 => {
                if !is_int_number(doc) {
                    return false;
                }
                let shared = self.value::<i64>(node, true).unwrap_or(0);
                if doc.as_i64() == Some(shared) {
                    return false;
                }
                *doc = Value::from(shared);
                true
            }
            Kind::F64 => {
                if !is_float_number(doc) {
                    return false;
                }
                let shared = self.value::<f64>(node, true).unwrap_or(0.0);
                if doc.as_f64() == Some(shared) {
                    return false;
                }
                *doc = Value::from(shared);
                true
            }
            Kind::Bool => {
                let Value::Bool(b) = doc else { return false };
                let shared = self.value::<bool>(node, true).unwrap_or(false);
                if *b == shared {
                    return false;
                }
                *doc = Value::Bool(shared);
                true
            }
            Kind::FixedStr => {
                let Value::String(s) = doc else { return false };
                let shared = self.value::<String>(node, true).unwrap_or_default();
                if *s == shared {
                    return false;
                }
                *doc = Value::String(shared);
                true
            }
        }
    }

    /// Deep comparison of the subtree at `node` against a document.
    ///
    /// Composites must match in size and every member; scalars must match
    /// in kind and value.
    pub fn matches_document(&self, node: NodeId, doc: &Value) -> bool {
        let n = self.tree().node(node);
        match (n.kind, doc) {
            (Kind::Unit, Value::Object(map)) => {
                n.children.len() == map.len()
                    && n.children.iter().all(|&c| {
                        map.get(&self.tree().node(c).name)
                            .is_some_and(|member| self.matches_document(c, member))
                    })
            }
            (Kind::Array, Value::Array(items)) => {
                n.children.len() == items.len()
                    && n.children
                        .iter()
                        .zip(items)
                        .all(|(&c, item)| self.matches_document(c, item))
            }
            (Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8, v) if is_int_number(v) => {
                v.as_i64() == self.value::<i64>(node, true)
            }
            (Kind::F64, v) if is_float_number(v) => v.as_f64() == self.value::<f64>(node, true),
            (Kind::Bool, Value::Bool(b)) => Some(*b) == self.value::<bool>(node, true),
            (Kind::FixedStr, Value::String(s)) => {
                Some(s.as_str()) == self.value::<String>(node, true).as_deref()
            }
            _ => false,
        }
    }
}
