use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Reason codes the driver reacts to
pub const REASON_BILLING_LIMIT: &str = "bytesBilledLimitExceeded";
pub const REASON_BILLING_TIER: &str = "billingTierLimitExceeded";
pub const REASON_STOPPED: &str = "stopped";
pub const REASON_NOT_FOUND: &str = "notFound";

/// Structured error reported by the backend
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} (reason: {reason})")]
pub struct BackendError {
    pub reason: String,
    pub message: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl BackendError {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError {
            reason: reason.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn is_billing_limit(&self) -> bool {
        self.reason == REASON_BILLING_LIMIT || self.reason == REASON_BILLING_TIER
    }

    pub fn is_stopped(&self) -> bool {
        self.reason == REASON_STOPPED
    }

    pub fn is_not_found(&self) -> bool {
        self.reason == REASON_NOT_FOUND
    }
}

/// Errors raised by a job-service transport
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl TransportError {
    /// The structured backend error behind this failure, if any
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            TransportError::Backend(err) => Some(err),
            _ => None,
        }
    }

    /// Human-readable detail: the backend's own message when structured,
    /// otherwise the stringified transport error
    pub fn detail(&self) -> String {
        match self.backend_error() {
            Some(err) => err.message.clone(),
            None => self.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.backend_error().is_some_and(BackendError::is_not_found)
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
