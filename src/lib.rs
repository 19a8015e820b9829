// BigQuery-style Warehouse Driver
//
// Synchronous, cursor-based access to an asynchronous, paginated job service.

pub mod backend;
pub mod common;
pub mod config;
pub mod cursor;
pub mod query;
pub mod session;
pub mod types;

// Re-export key items for convenient access
pub use backend::{Credential, JobService, InMemoryJobService};
pub use config::{ConfigError, ConnectionConfig, PollSchedule};
pub use cursor::{CursorError, CursorKind, CursorPosition, RowCursor};
pub use query::{ExecutionPhase, JobHandle, Query, QueryError, QueryExecutor, ResultPage};
pub use session::{Connection, SessionRegistry, Statement};
pub use types::{Cell, TypeCoercion, Value};
