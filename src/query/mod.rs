// Query Execution Module
//
// Submission, sync-then-async job handling, cancellation and result paging.

pub mod error;
pub mod executor;
pub mod job;
pub mod page;
pub mod request;

pub use error::{QueryError, QueryResult};
pub use executor::{CancelOutcome, ExecutionPhase, ExecutionResult, ExecutorCore, QueryExecutor};
pub use job::JobHandle;
pub use page::{ResultPage, ResultPager};
pub use request::{Dialect, Query, QueryBuilder};
