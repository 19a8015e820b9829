// Backend Module
//
// The outbound boundary of the driver: the job-service trait the executor and
// cursors call, its wire model, and an in-process implementation.

pub mod error;
pub mod memory;
pub mod model;

use std::fmt;

pub use error::{BackendError, TransportError, TransportResult};
pub use memory::InMemoryJobService;
pub use model::{
    BiEngineReason, BiEngineStatistics, JobCreationMode, JobReference, JobSnapshot, JobState, JobStatistics,
    JobStatus, QueryRequest, QueryResponse,
};

/// Opaque bearer credential attached to every outbound call.
///
/// The driver never inspects or refreshes it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Credential(token.into())
    }

    /// Raw token for the transport to place on the wire
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Job-service operations used by the driver.
///
/// Implementations perform one blocking call per method; timeouts on those
/// calls belong to the implementation.
pub trait JobService: Send + Sync {
    /// Submit a query and wait up to `request.timeout_ms` for completion
    fn insert_query(&self, credential: &Credential, request: &QueryRequest) -> TransportResult<QueryResponse>;

    /// Fetch the current status and statistics of a job
    fn get_job(&self, credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot>;

    /// Fetch one page of a finished job's results
    fn get_query_results(
        &self,
        credential: &Credential,
        job: &JobReference,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> TransportResult<QueryResponse>;

    /// Request cancellation of a job
    fn cancel_job(&self, credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot>;
}
