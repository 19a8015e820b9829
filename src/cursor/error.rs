use thiserror::Error;

use crate::cursor::CursorPosition;
use crate::query::QueryError;
use crate::types::CoercionError;

/// Errors raised by cursor navigation and cell access
#[derive(Error, Debug, Clone)]
pub enum CursorError {
    #[error("cursor is not positioned on a valid row (position: {0})")]
    NotOnRow(CursorPosition),

    #[error("{0} is not supported on a forward-only cursor")]
    ForwardOnly(&'static str),

    #[error("Cursor is closed")]
    Closed,

    #[error("Column index {index} is out of range (1..={count})")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Invalid cursor argument: {0}")]
    InvalidArgument(String),

    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    #[error("Failed to fetch rows: {0}")]
    Fetch(#[from] QueryError),
}

impl CursorError {
    pub fn is_positioning(&self) -> bool {
        matches!(self, CursorError::NotOnRow(_) | CursorError::ForwardOnly(_))
    }
}

/// Result type for cursor operations
pub type CursorResult<T> = Result<T, CursorError>;
