use std::sync::Arc;
use parking_lot::RwLock;

use crate::query::job::JobHandle;

/// Synchronous execution window sent with every query submission (10 seconds)
pub const SYNC_TIMEOUT_MS: u64 = 10_000;

/// Page size the in-memory service picks when a request leaves it unset
pub const DEFAULT_FETCH_SIZE: u32 = 10_000;

/// Delimiter the backend places inside synthetic query ids of stateless results
pub const STATELESS_QUERY_ID_DELIMITER: char = '!';

/// Maximum length of a label key or value
pub const MAX_LABEL_LENGTH: usize = 63;

/// Executor identity within a session registry
pub type ExecutorId = u64;

/// 1-based row number within a result
pub type RowNumber = u64;

/// 1-based column index within a result
pub type ColumnIndex = usize;

/// Job handle shared between an executor (writer) and its cursors (readers)
pub type SharedJobHandle = Arc<RwLock<JobHandle>>;
