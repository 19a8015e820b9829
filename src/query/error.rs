use thiserror::Error;

use crate::backend::TransportError;
use crate::config::ConfigError;

/// Errors raised while executing a query or fetching its results
#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{context}: {detail}")]
    Submission { context: String, detail: String },

    #[error("{context}: {detail}")]
    Poll { context: String, detail: String },

    #[error("Backend did not return a job reference for an incomplete query")]
    MissingJobReference,

    #[error("Malformed job snapshot: {0}")]
    MalformedJob(String),

    #[error("Malformed query response: {0}")]
    MalformedResponse(String),

    #[error("Query {} was cancelled: {reason}", .job_id.as_deref().unwrap_or("<unsubmitted>"))]
    Cancelled { job_id: Option<String>, reason: String },

    #[error(
        "Billing limit{} exceeded: {message}",
        .limit.map(|bytes| format!(" of {} bytes", bytes)).unwrap_or_default()
    )]
    BillingLimitExceeded { limit: Option<i64>, message: String },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid executor state: {0}")]
    InvalidState(String),

    #[error("Executor is closed")]
    Closed,
}

impl QueryError {
    /// Submission failure carrying the backend's own message when structured
    pub fn submission(context: impl Into<String>, err: &TransportError) -> Self {
        QueryError::Submission {
            context: context.into(),
            detail: err.detail(),
        }
    }

    /// Polling or page-fetch failure carrying the backend's own message when structured
    pub fn poll(context: impl Into<String>, err: &TransportError) -> Self {
        QueryError::Poll {
            context: context.into(),
            detail: err.detail(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QueryError::Cancelled { .. })
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
