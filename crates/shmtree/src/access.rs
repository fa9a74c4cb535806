//! Typed accessors: read, write and coerce primitives at a resolved node.
//!
//! A single [`Scalar`] trait carries the whole coercion matrix, so
//! `store.read::<i32>("cfg/rev", true)` and `store.update(node, 4.2f64,
//! true)` cover every (operation, primitive kind) combination without a
//! per-kind accessor zoo.
//!
//! Coercion rules:
//!
//! - integers narrow by truncation, floats round to the nearest integer
//! - booleans are stored as `0x00`/`0xFF` and read back as `!= 0`
//! - a string rendition of a float honors the schema's `precision`
//!   (default 6); integers render in decimal
//! - parsing a stored string as a number auto-detects the base
//!   (`0x…` hex, leading `0` octal, else decimal) and reads the longest
//!   valid prefix, yielding 0 if there is none
//! - a string is true iff it equals `"True"` case-insensitively
//!
//! None of these fail: only addressing a composite (or an unresolvable
//! path) yields `None`/`false`, with a logged diagnostic.

use shmtree_primitives::Region;

use crate::node::{Node, NodeId};
use crate::schema::Kind;
use crate::store::SharedTree;

mod sealed {
    pub trait Sealed {}
}

/// A type that can be read from and written into any primitive node.
///
/// Implemented for the integer widths, `f64`, `bool` and `String`; the
/// trait is sealed, the coercion matrix is closed.
pub trait Scalar: sealed::Sealed + Sized {
    /// Read the node's current value coerced to `Self`. `None` for
    /// composites.
    fn load_from(region: &Region, node: &Node) -> Option<Self>;

    /// Coerce `self` into the node's kind and store it. `false` for
    /// composites.
    fn store_into(&self, region: &Region, node: &Node) -> bool;
}

// ── raw coercion helpers ───────────────────────────────────────────────────

pub(crate) fn load_as_i64(region: &Region, node: &Node) -> Option<i64> {
    let off = node.data_offset as usize;
    let v = match node.kind {
        Kind::F64 => {
            let f = region.read_f64(off);
            f.round() as i64
        }
        Kind::I64 => region.read_u64(off) as i64,
        Kind::I32 => region.read_u32(off) as i32 as i64,
        Kind::I16 => region.read_u16(off) as i16 as i64,
        Kind::I8 => region.read_u8(off) as i8 as i64,
        Kind::Bool => (region.read_u8(off) != 0) as i64,
        Kind::FixedStr => parse_i64_auto(&region.read_cstr(off, node.size as usize)),
        Kind::Unit | Kind::Array => return None,
    };
    Some(v)
}

pub(crate) fn load_as_f64(region: &Region, node: &Node) -> Option<f64> {
    let off = node.data_offset as usize;
    let v = match node.kind {
        Kind::F64 => region.read_f64(off),
        Kind::I64 => region.read_u64(off) as i64 as f64,
        Kind::I32 => region.read_u32(off) as i32 as f64,
        Kind::I16 => region.read_u16(off) as i16 as f64,
        Kind::I8 => region.read_u8(off) as i8 as f64,
        Kind::Bool => {
            if region.read_u8(off) != 0 {
                1.0
            } else {
                0.0
            }
        }
        Kind::FixedStr => parse_f64_prefix(&region.read_cstr(off, node.size as usize)),
        Kind::Unit | Kind::Array => return None,
    };
    Some(v)
}

pub(crate) fn load_as_bool(region: &Region, node: &Node) -> Option<bool> {
    let off = node.data_offset as usize;
    let v = match node.kind {
        Kind::Bool | Kind::I8 => region.read_u8(off) != 0,
        Kind::I16 => region.read_u16(off) != 0,
        Kind::I32 => region.read_u32(off) != 0,
        Kind::I64 => region.read_u64(off) != 0,
        Kind::F64 => region.read_f64(off) != 0.0,
        Kind::FixedStr => region
            .read_cstr(off, node.size as usize)
            .eq_ignore_ascii_case("true"),
        Kind::Unit | Kind::Array => return None,
    };
    Some(v)
}

pub(crate) fn load_as_string(region: &Region, node: &Node) -> Option<String> {
    let off = node.data_offset as usize;
    let v = match node.kind {
        Kind::FixedStr => region.read_cstr(off, node.size as usize),
        Kind::F64 => format_f64(region.read_f64(off), node.precision),
        Kind::I64 => (region.read_u64(off) as i64).to_string(),
        Kind::I32 => (region.read_u32(off) as i32).to_string(),
        Kind::I16 => (region.read_u16(off) as i16).to_string(),
        Kind::I8 => (region.read_u8(off) as i8).to_string(),
        Kind::Bool => bool_str(region.read_u8(off) != 0).to_owned(),
        Kind::Unit | Kind::Array => return None,
    };
    Some(v)
}

pub(crate) fn store_i64(region: &Region, node: &Node, v: i64) -> bool {
    let off = node.data_offset as usize;
    match node.kind {
        Kind::F64 => region.write_f64(off, v as f64),
        Kind::I64 => region.write_u64(off, v as u64),
        Kind::I32 => region.write_u32(off, v as u32),
        Kind::I16 => region.write_u16(off, v as u16),
        Kind::I8 => region.write_u8(off, v as u8),
        Kind::Bool => region.write_u8(off, bool_byte(v != 0)),
        Kind::FixedStr => region.write_cstr(off, node.size as usize, &v.to_string()),
        Kind::Unit | Kind::Array => return false,
    }
    true
}

pub(crate) fn store_f64(region: &Region, node: &Node, v: f64) -> bool {
    let off = node.data_offset as usize;
    match node.kind {
        Kind::F64 => region.write_f64(off, v),
        Kind::I64 => region.write_u64(off, v.round() as i64 as u64),
        Kind::I32 => region.write_u32(off, v.round() as i64 as u32),
        Kind::I16 => region.write_u16(off, v.round() as i64 as u16),
        Kind::I8 => region.write_u8(off, v.round() as i64 as u8),
        Kind::Bool => region.write_u8(off, bool_byte(v != 0.0)),
        Kind::FixedStr => {
            region.write_cstr(off, node.size as usize, &format_f64(v, node.precision))
        }
        Kind::Unit | Kind::Array => return false,
    }
    true
}

pub(crate) fn store_bool(region: &Region, node: &Node, v: bool) -> bool {
    let off = node.data_offset as usize;
    match node.kind {
        Kind::Bool => region.write_u8(off, bool_byte(v)),
        Kind::I8 => region.write_u8(off, v as u8),
        Kind::I16 => region.write_u16(off, v as u16),
        Kind::I32 => region.write_u32(off, v as u32),
        Kind::I64 => region.write_u64(off, v as u64),
        Kind::F64 => region.write_f64(off, if v { 1.0 } else { 0.0 }),
        Kind::FixedStr => region.write_cstr(off, node.size as usize, bool_str(v)),
        Kind::Unit | Kind::Array => return false,
    }
    true
}

pub(crate) fn store_str(region: &Region, node: &Node, s: &str) -> bool {
    match node.kind {
        Kind::FixedStr => {
            region.write_cstr(node.data_offset as usize, node.size as usize, s);
            true
        }
        Kind::F64 => store_f64(region, node, parse_f64_prefix(s)),
        Kind::I64 | Kind::I32 | Kind::I16 | Kind::I8 => {
            store_i64(region, node, parse_i64_auto(s))
        }
        Kind::Bool => {
            region.write_u8(
                node.data_offset as usize,
                bool_byte(s.eq_ignore_ascii_case("true")),
            );
            true
        }
        Kind::Unit | Kind::Array => false,
    }
}

#[inline]
fn bool_byte(v: bool) -> u8 {
    if v { 0xFF } else { 0x00 }
}

#[inline]
fn bool_str(v: bool) -> &'static str {
    if v { "True" } else { "False" }
}

fn format_f64(v: f64, precision: Option<u8>) -> String {
    format!("{:.*}", precision.unwrap_or(6) as usize, v)
}

/// Parse the longest integer prefix of `s`, auto-detecting the base the way
/// `strtol(str, NULL, 0)` does: `0x`/`0X` is hex, a leading `0` is octal,
/// anything else decimal. An optional sign comes before the base prefix.
/// No digits at all yields 0; overflow saturates.
pub(crate) fn parse_i64_auto(s: &str) -> i64 {
    let t = s.trim_start();
    let (neg, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let (radix, digits) = if t.len() > 1 && (t.starts_with("0x") || t.starts_with("0X")) {
        (16u32, &t[2..])
    } else if t.len() > 1 && t.starts_with('0') {
        (8u32, &t[1..])
    } else {
        (10u32, t)
    };

    let mut acc: i64 = 0;
    let mut any = false;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        any = true;
        acc = match acc
            .checked_mul(radix as i64)
            .and_then(|a| a.checked_add(d as i64))
        {
            Some(a) => a,
            None => {
                return if neg { i64::MIN } else { i64::MAX };
            }
        };
    }
    // a bare "0" takes the octal branch with no digits left; it is still 0
    if !any && radix == 16 {
        return 0;
    }
    if neg { -acc } else { acc }
}

/// Parse the longest float prefix of `s`, 0.0 if there is none.
pub(crate) fn parse_f64_prefix(s: &str) -> f64 {
    let t = s.trim();
    let mut end = t.len();
    while end > 0 {
        if t.is_char_boundary(end)
            && let Ok(v) = t[..end].parse::<f64>()
        {
            return v;
        }
        end -= 1;
    }
    0.0
}

// ── Scalar impls ───────────────────────────────────────────────────────────

macro_rules! int_scalar {
    ($($t:ty),* $(,)?) => {$(
        impl sealed::Sealed for $t {}
        impl Scalar for $t {
            fn load_from(region: &Region, node: &Node) -> Option<Self> {
                load_as_i64(region, node).map(|v| v as $t)
            }
            fn store_into(&self, region: &Region, node: &Node) -> bool {
                store_i64(region, node, *self as i64)
            }
        }
    )*};
}

int_scalar!(i64, u64, i32, u32, i16, u16, i8, u8);

impl sealed::Sealed for f64 {}
impl Scalar for f64 {
    fn load_from(region: &Region, node: &Node) -> Option<Self> {
        load_as_f64(region, node)
    }
    fn store_into(&self, region: &Region, node: &Node) -> bool {
        store_f64(region, node, *self)
    }
}

impl sealed::Sealed for bool {}
impl Scalar for bool {
    fn load_from(region: &Region, node: &Node) -> Option<Self> {
        load_as_bool(region, node)
    }
    fn store_into(&self, region: &Region, node: &Node) -> bool {
        store_bool(region, node, *self)
    }
}

impl sealed::Sealed for String {}
impl Scalar for String {
    fn load_from(region: &Region, node: &Node) -> Option<Self> {
        load_as_string(region, node)
    }
    fn store_into(&self, region: &Region, node: &Node) -> bool {
        store_str(region, node, self)
    }
}

// ── accessor surface on the store ──────────────────────────────────────────

impl SharedTree {
    /// Read a resolved node coerced to `T`.
    ///
    /// With `protect` the node's subtree semaphore is held for the read;
    /// without it the caller asserts it already holds that semaphore (or
    /// tolerates a torn read on multi-byte values).
    pub fn value<T: Scalar>(&self, node: NodeId, protect: bool) -> Option<T> {
        let n = self.tree().node(node);
        if n.kind.is_composite() {
            tracing::debug!(name = %n.name, kind = %n.kind, "scalar read of a composite");
            return None;
        }
        let _g = match self.guard_for(n, protect) {
            Ok(g) => g,
            Err(e) => {
                tracing::error!(name = %n.name, error = %e, "subtree lock failed; read dropped");
                return None;
            }
        };
        T::load_from(&self.region(), n)
    }

    /// Resolve `path` from the root and read it coerced to `T`.
    pub fn read<T: Scalar>(&self, path: &str, protect: bool) -> Option<T> {
        self.read_from(self.tree().root(), path, protect)
    }

    /// Resolve `path` relative to `base` and read it coerced to `T`.
    pub fn read_from<T: Scalar>(&self, base: NodeId, path: &str, protect: bool) -> Option<T> {
        match self.tree().resolve_from(base, path) {
            Some(id) => self.value(id, protect),
            None => {
                tracing::warn!(path, "read of unresolvable path");
                None
            }
        }
    }

    /// Coerce `value` into a resolved node's kind, store it, and stamp the
    /// node's update timestamp.
    ///
    /// Returns false (and stamps nothing) if the node is a composite.
    pub fn update<T: Scalar>(&self, node: NodeId, value: T, protect: bool) -> bool {
        let n = self.tree().node(node);
        if n.kind.is_composite() {
            tracing::debug!(name = %n.name, kind = %n.kind, "scalar update of a composite");
            return false;
        }
        let _g = match self.guard_for(n, protect) {
            Ok(g) => g,
            Err(e) => {
                tracing::error!(name = %n.name, error = %e, "subtree lock failed; update dropped");
                return false;
            }
        };
        let ok = value.store_into(&self.region(), n);
        if ok {
            self.stamp(n);
        }
        ok
    }

    /// Resolve `path` from the root and update it.
    pub fn write<T: Scalar>(&self, path: &str, value: T, protect: bool) -> bool {
        self.write_from(self.tree().root(), path, value, protect)
    }

    /// Resolve `path` relative to `base` and update it.
    pub fn write_from<T: Scalar>(
        &self,
        base: NodeId,
        path: &str,
        value: T,
        protect: bool,
    ) -> bool {
        match self.tree().resolve_from(base, path) {
            Some(id) => self.update(id, value, protect),
            None => {
                tracing::warn!(path, "write to unresolvable path");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeTree;
    use crate::schema::Schema;
    use serde_json::json;
    use shmtree_primitives::PayloadBuf;

    fn fixture() -> (NodeTree, PayloadBuf) {
        let schema = Schema::from_value(json!({
            "f": { "type": "float", "defaultValue": 0.0, "precision": 2 },
            "l": { "type": "int", "size": 8, "defaultValue": 0 },
            "i": { "type": "int", "size": 4, "defaultValue": 0 },
            "h": { "type": "int", "size": 2, "defaultValue": 0 },
            "b": { "type": "int", "size": 1, "defaultValue": 0 },
            "flag": { "type": "bool", "defaultValue": false },
            "s": { "type": "string", "size": 12, "defaultValue": "" }
        }))
        .unwrap();
        let tree = NodeTree::build(&schema).unwrap();
        let buf = PayloadBuf::new_zeroed(tree.payload_size());
        (tree, buf)
    }

    fn node<'t>(t: &'t NodeTree, path: &str) -> &'t Node {
        t.node(t.resolve(path).unwrap())
    }

    #[test]
    fn same_kind_round_trips() {
        let (t, buf) = fixture();
        let r = buf.region();

        assert!(store_f64(&r, node(&t, "f"), -2.75));
        assert_eq!(load_as_f64(&r, node(&t, "f")), Some(-2.75));

        assert!(store_i64(&r, node(&t, "l"), -1234567890123));
        assert_eq!(load_as_i64(&r, node(&t, "l")), Some(-1234567890123));

        assert!(store_i64(&r, node(&t, "i"), -40000));
        assert_eq!(load_as_i64(&r, node(&t, "i")), Some(-40000));

        assert!(store_i64(&r, node(&t, "h"), -300));
        assert_eq!(load_as_i64(&r, node(&t, "h")), Some(-300));

        assert!(store_bool(&r, node(&t, "flag"), true));
        assert_eq!(load_as_bool(&r, node(&t, "flag")), Some(true));

        assert!(store_str(&r, node(&t, "s"), "hello"));
        assert_eq!(load_as_string(&r, node(&t, "s")), Some("hello".into()));
    }

    #[test]
    fn floats_round_into_integers() {
        let (t, buf) = fixture();
        let r = buf.region();
        store_f64(&r, node(&t, "i"), 2.5);
        assert_eq!(load_as_i64(&r, node(&t, "i")), Some(3));
        store_f64(&r, node(&t, "i"), -2.5);
        assert_eq!(load_as_i64(&r, node(&t, "i")), Some(-3));
        store_f64(&r, node(&t, "i"), 2.4);
        assert_eq!(load_as_i64(&r, node(&t, "i")), Some(2));
    }

    #[test]
    fn integers_truncate_when_narrowed() {
        let (t, buf) = fixture();
        let r = buf.region();
        store_i64(&r, node(&t, "b"), 0x1FF);
        assert_eq!(load_as_i64(&r, node(&t, "b")), Some(-1)); // 0xFF as i8
        store_i64(&r, node(&t, "h"), 0x1_0001);
        assert_eq!(load_as_i64(&r, node(&t, "h")), Some(1));
    }

    #[test]
    fn bool_storage_bytes() {
        let (t, buf) = fixture();
        let r = buf.region();
        let flag = node(&t, "flag");
        store_bool(&r, flag, true);
        assert_eq!(r.read_u8(flag.data_offset as usize), 0xFF);
        store_bool(&r, flag, false);
        assert_eq!(r.read_u8(flag.data_offset as usize), 0x00);
        // any nonzero byte reads as true
        r.write_u8(flag.data_offset as usize, 0x01);
        assert_eq!(load_as_bool(&r, flag), Some(true));
    }

    #[test]
    fn string_renditions() {
        let (t, buf) = fixture();
        let r = buf.region();
        store_f64(&r, node(&t, "f"), 1.0 / 3.0);
        // precision 2 from the schema
        assert_eq!(load_as_string(&r, node(&t, "f")), Some("0.33".into()));

        store_i64(&r, node(&t, "i"), -42);
        assert_eq!(load_as_string(&r, node(&t, "i")), Some("-42".into()));

        store_bool(&r, node(&t, "flag"), true);
        assert_eq!(load_as_string(&r, node(&t, "flag")), Some("True".into()));
    }

    #[test]
    fn strings_parse_into_numbers_with_auto_radix() {
        let (t, buf) = fixture();
        let r = buf.region();
        let i = node(&t, "i");

        store_str(&r, i, "0x10");
        assert_eq!(load_as_i64(&r, i), Some(16));
        store_str(&r, i, "010");
        assert_eq!(load_as_i64(&r, i), Some(8));
        store_str(&r, i, "10");
        assert_eq!(load_as_i64(&r, i), Some(10));
        store_str(&r, i, "-12junk");
        assert_eq!(load_as_i64(&r, i), Some(-12));
        store_str(&r, i, "junk");
        assert_eq!(load_as_i64(&r, i), Some(0));

        let f = node(&t, "f");
        store_str(&r, f, "2.5e1x");
        assert_eq!(load_as_f64(&r, f), Some(25.0));
    }

    #[test]
    fn string_to_bool_compares_to_true() {
        let (t, buf) = fixture();
        let r = buf.region();
        let s = node(&t, "s");
        store_str(&r, s, "TRUE");
        assert_eq!(load_as_bool(&r, s), Some(true));
        store_str(&r, s, "1");
        assert_eq!(load_as_bool(&r, s), Some(false));
    }

    #[test]
    fn fixed_str_truncates_to_capacity() {
        let (t, buf) = fixture();
        let r = buf.region();
        let s = node(&t, "s"); // size 12, so 11 usable bytes
        store_str(&r, s, "a-very-long-string");
        assert_eq!(load_as_string(&r, s), Some("a-very-long".into()));
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_i64_auto("  42"), 42);
        assert_eq!(parse_i64_auto("0"), 0);
        assert_eq!(parse_i64_auto("0x"), 0);
        assert_eq!(parse_i64_auto("+0x2A"), 42);
        assert_eq!(parse_i64_auto(""), 0);
        assert_eq!(parse_i64_auto("99999999999999999999999"), i64::MAX);
        assert_eq!(parse_f64_prefix("3.5 mm"), 3.5);
        assert_eq!(parse_f64_prefix("nope"), 0.0);
    }
}
