// Job Service Wire Model
//
// Request and response shapes exchanged with the job service. The transport
// that carries them is external; these types only fix what the driver sends
// and what it expects back.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::backend::error::BackendError;
use crate::types::{Cell, Field};

/// Fully-qualified reference to a backend job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl JobReference {
    pub fn new(project_id: impl Into<String>, job_id: impl Into<String>, location: Option<String>) -> Self {
        JobReference {
            project_id: project_id.into(),
            job_id: job_id.into(),
            location,
        }
    }
}

impl fmt::Display for JobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}:{}.{}", self.project_id, location, self.job_id),
            None => write!(f, "{}:{}", self.project_id, self.job_id),
        }
    }
}

/// Lifecycle state of a backend job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "PENDING"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Done => write!(f, "DONE"),
        }
    }
}

/// Whether the backend may answer without creating a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobCreationMode {
    Required,
    Optional,
}

/// Query submission (job insert with a synchronous wait)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    pub labels: BTreeMap<String, String>,
    pub maximum_bytes_billed: Option<i64>,
    /// Synchronous wait the backend may spend before answering
    pub timeout_ms: u64,
    /// Limit on the job's own execution time
    pub job_timeout_ms: Option<u64>,
    pub location: Option<String>,
    pub use_query_cache: bool,
    pub job_creation_mode: JobCreationMode,
    pub max_results: Option<u32>,
}

/// Answer to a query submission or a results-page request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub job_reference: Option<JobReference>,
    pub query_id: Option<String>,
    pub job_complete: bool,
    pub schema: Option<Vec<Field>>,
    #[serde(default)]
    pub rows: Vec<Vec<Cell>>,
    pub page_token: Option<String>,
    pub total_rows: Option<u64>,
    pub total_bytes_processed: Option<i64>,
    pub cache_hit: Option<bool>,
    #[serde(default)]
    pub errors: Vec<BackendError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub error_result: Option<BackendError>,
    #[serde(default)]
    pub errors: Vec<BackendError>,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        JobStatus {
            state,
            error_result: None,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiEngineReason {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiEngineStatistics {
    pub mode: String,
    #[serde(default)]
    pub reasons: Vec<BiEngineReason>,
}

/// Job statistics; times are epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub creation_time: Option<i64>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub total_bytes_processed: Option<i64>,
    pub cache_hit: Option<bool>,
    pub bi_engine: Option<BiEngineStatistics>,
}

/// Polled view of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_reference: Option<JobReference>,
    pub status: Option<JobStatus>,
    pub statistics: Option<JobStatistics>,
}
