//! Error types for schema compilation and store attachment.

use std::io;

/// Errors detected while validating or compiling a schema document.
///
/// All of these are fatal at construction: a store never attaches with a
/// half-compiled tree.
#[derive(Debug)]
pub enum SchemaError {
    /// The document (or a subtree spec) is not a JSON object.
    NotAnObject(String),
    /// A spec entry's `type` is not one of float/int/bool/string/unit/array.
    UnknownType { path: String, ty: String },
    /// A primitive spec has no `defaultValue`.
    MissingDefault(String),
    /// An `int` spec has no `size`, or a size outside {1, 2, 4, 8}.
    BadIntSize { path: String, size: Option<i64> },
    /// A `string` spec has no `size`, or a size < 1.
    BadStringSize { path: String, size: Option<i64> },
    /// An array's children are not densely numbered from 0.
    NonDenseArray(String),
    /// The schema file could not be read.
    Io(io::Error),
    /// The schema file is not valid JSON.
    Parse(serde_json::Error),
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::NotAnObject(path) => {
                write!(f, "schema element `{path}` is not an object")
            }
            SchemaError::UnknownType { path, ty } => {
                write!(f, "schema element `{path}` has unknown type `{ty}`")
            }
            SchemaError::MissingDefault(path) => {
                write!(f, "schema element `{path}` has no `defaultValue`")
            }
            SchemaError::BadIntSize { path, size: Some(s) } => {
                write!(f, "schema element `{path}` has int size {s}, expected 1, 2, 4 or 8")
            }
            SchemaError::BadIntSize { path, size: None } => {
                write!(f, "schema element `{path}` is an int with no `size`")
            }
            SchemaError::BadStringSize { path, size: Some(s) } => {
                write!(f, "schema element `{path}` has string size {s}, expected >= 1")
            }
            SchemaError::BadStringSize { path, size: None } => {
                write!(f, "schema element `{path}` is a string with no `size`")
            }
            SchemaError::NonDenseArray(path) => {
                write!(f, "array `{path}` is not densely numbered from 0")
            }
            SchemaError::Io(e) => write!(f, "failed to read schema file: {e}"),
            SchemaError::Parse(e) => write!(f, "schema file is not valid JSON: {e}"),
        }
    }
}

impl std::error::Error for SchemaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchemaError::Io(e) => Some(e),
            SchemaError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SchemaError {
    fn from(e: io::Error) -> Self {
        SchemaError::Io(e)
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        SchemaError::Parse(e)
    }
}

/// Errors that abort attaching to a shared segment.
///
/// A corrupt header or an initialization-wait timeout is *not* in this set:
/// both are logged and recovered by re-initializing (see the store docs).
#[derive(Debug)]
pub enum StoreError {
    /// The schema failed to validate or compile.
    Schema(SchemaError),
    /// The segment could not be created, truncated or mapped.
    SegmentOpen(io::Error),
    /// A named semaphore could not be opened.
    SemaphoreOpen { name: String, source: io::Error },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Schema(e) => write!(f, "invalid schema: {e}"),
            StoreError::SegmentOpen(e) => write!(f, "failed to open segment: {e}"),
            StoreError::SemaphoreOpen { name, source } => {
                write!(f, "failed to open semaphore `{name}`: {source}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Schema(e) => Some(e),
            StoreError::SegmentOpen(e) => Some(e),
            StoreError::SemaphoreOpen { source, .. } => Some(source),
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(e: SchemaError) -> Self {
        StoreError::Schema(e)
    }
}
