//! Schema documents: the declarative description a store is compiled from.
//!
//! A schema is a JSON object whose entries describe either primitives
//! (`"type": "float" | "int" | "bool" | "string"`) or composites
//! (`"type": "unit" | "array"`) with nested children. Primitive specs carry
//! `defaultValue` (required), `size` (required for int and string),
//! `precision` (float formatting) and `hysteresis` (change-detection
//! threshold). Unknown keys are ignored; an entry without a `type` is
//! treated as a unit, which is also what makes the document root itself a
//! unit.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde_json::{Map, Value};

use crate::error::SchemaError;

/// The closed set of element kinds a schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    F64,
    I64,
    I32,
    I16,
    I8,
    Bool,
    FixedStr,
    Unit,
    Array,
}

impl Kind {
    /// True for `Unit` and `Array`.
    #[inline]
    pub fn is_composite(self) -> bool {
        matches!(self, Kind::Unit | Kind::Array)
    }

    /// True for every leaf kind.
    #[inline]
    pub fn is_primitive(self) -> bool {
        !self.is_composite()
    }

    /// Storage width in bytes; 0 for `FixedStr` (declared per field) and
    /// for composites (no storage of their own).
    pub fn width(self) -> u32 {
        match self {
            Kind::F64 | Kind::I64 => 8,
            Kind::I32 => 4,
            Kind::I16 => 2,
            Kind::I8 | Kind::Bool => 1,
            Kind::FixedStr | Kind::Unit | Kind::Array => 0,
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Kind::F64 => "float",
            Kind::I64 => "int64",
            Kind::I32 => "int32",
            Kind::I16 => "int16",
            Kind::I8 => "int8",
            Kind::Bool => "bool",
            Kind::FixedStr => "string",
            Kind::Unit => "unit",
            Kind::Array => "array",
        };
        f.write_str(s)
    }
}

/// A schema document, held as parsed JSON.
///
/// Construction checks only that the root is an object; the full structural
/// validation happens when the node tree is compiled, so every defect is
/// reported against the path where it occurs.
#[derive(Debug, Clone)]
pub struct Schema {
    root: Value,
}

impl Schema {
    /// Wrap an already-parsed document.
    pub fn from_value(root: Value) -> Result<Self, SchemaError> {
        if !root.is_object() {
            return Err(SchemaError::NotAnObject(String::new()));
        }
        Ok(Self { root })
    }

    /// Read and parse a schema from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let file = File::open(path.as_ref())?;
        let root: Value = serde_json::from_reader(BufReader::new(file))?;
        Self::from_value(root)
    }

    /// The underlying document. Always an object.
    #[inline]
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub(crate) fn root_map(&self) -> &Map<String, Value> {
        self.root.as_object().expect("schema root is an object")
    }
}

/// Look up `key` in a spec object, falling back to a case-insensitive scan.
pub(crate) fn find_entry<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key)
        .or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
}

/// A parsed schema entry, before offsets are assigned.
pub(crate) enum ElementSpec<'a> {
    Unit,
    Array,
    Primitive {
        kind: Kind,
        /// Storage size in bytes (declared size for strings).
        size: u32,
        default: &'a Value,
        precision: Option<u8>,
        hysteresis: i64,
    },
}

/// Parse one spec object. `path` is the element's slash path, used only in
/// error messages.
pub(crate) fn parse_element<'a>(
    path: &str,
    spec: &'a Map<String, Value>,
) -> Result<ElementSpec<'a>, SchemaError> {
    let ty = match find_entry(spec, "type").and_then(Value::as_str) {
        Some(s) => s,
        // no type string means a plain nested object
        None => return Ok(ElementSpec::Unit),
    };

    if ty.eq_ignore_ascii_case("unit") {
        return Ok(ElementSpec::Unit);
    }
    if ty.eq_ignore_ascii_case("array") {
        return Ok(ElementSpec::Array);
    }

    let declared_size = find_entry(spec, "size").and_then(Value::as_i64);
    let (kind, size) = if ty.eq_ignore_ascii_case("float") {
        (Kind::F64, 8)
    } else if ty.eq_ignore_ascii_case("bool") {
        (Kind::Bool, 1)
    } else if ty.eq_ignore_ascii_case("int") {
        match declared_size {
            Some(1) => (Kind::I8, 1),
            Some(2) => (Kind::I16, 2),
            Some(4) => (Kind::I32, 4),
            Some(8) => (Kind::I64, 8),
            other => {
                return Err(SchemaError::BadIntSize {
                    path: path.to_owned(),
                    size: other,
                });
            }
        }
    } else if ty.eq_ignore_ascii_case("string") {
        match declared_size {
            Some(n) if n >= 1 => (Kind::FixedStr, n as u32),
            other => {
                return Err(SchemaError::BadStringSize {
                    path: path.to_owned(),
                    size: other,
                });
            }
        }
    } else {
        return Err(SchemaError::UnknownType {
            path: path.to_owned(),
            ty: ty.to_owned(),
        });
    };

    let default = find_entry(spec, "defaultValue")
        .ok_or_else(|| SchemaError::MissingDefault(path.to_owned()))?;

    let precision = spec
        .get("precision")
        .and_then(Value::as_i64)
        .map(|p| p.clamp(0, 17) as u8);
    let hysteresis = spec
        .get("hysteresis")
        .map(|h| h.as_i64().unwrap_or_else(|| h.as_f64().unwrap_or(0.0) as i64))
        .unwrap_or(0);

    Ok(ElementSpec::Primitive {
        kind,
        size,
        default,
        precision,
        hysteresis,
    })
}
