use thiserror::Error;

use crate::types::schema::FieldKind;

/// Errors raised while converting a backend cell
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoercionError {
    #[error("Unknown backend type: {0}")]
    UnknownType(String),
    #[error("Cannot convert {kind} value '{raw}' to {target}")]
    Unsupported {
        kind: String,
        raw: String,
        target: &'static str,
    },
    #[error("Malformed {kind} value '{raw}': {reason}")]
    Malformed {
        kind: FieldKind,
        raw: String,
        reason: String,
    },
    #[error("Cell shape does not match field '{field}': {reason}")]
    ShapeMismatch { field: String, reason: String },
}

/// Result type for type coercion
pub type CoercionResult<T> = Result<T, CoercionError>;
