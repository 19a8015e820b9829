// Row Cursor Module
//
// Synchronous row-at-a-time access to query results. Two variants share one
// trait: a forward-only cursor that pulls pages lazily and a scrollable
// cursor that drains every page up front. Both compose a `CursorCore` for
// metadata, type coercion and the job view.

pub mod error;
pub mod materialized;
pub mod metadata;
pub mod streaming;

use std::fmt;
use std::sync::Arc;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, Deserialize};

use crate::common::types::{ColumnIndex, RowNumber, SharedJobHandle};
use crate::query::executor::ExecutionResult;
use crate::query::job::JobHandle;
use crate::query::QueryResult;
use crate::session::registry::RegistryEntry;
use crate::types::{Cell, Field, TypeCoercion, Value};

pub use error::{CursorError, CursorResult};
pub use materialized::MaterializedCursor;
pub use metadata::{ColumnMeta, ResultMetadata};
pub use streaming::StreamingCursor;

/// Where a cursor currently points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPosition {
    BeforeFirst,
    /// 1-based row number
    OnRow(RowNumber),
    AfterLast,
    Closed,
}

impl fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorPosition::BeforeFirst => write!(f, "before first row"),
            CursorPosition::OnRow(n) => write!(f, "row {}", n),
            CursorPosition::AfterLast => write!(f, "after last row"),
            CursorPosition::Closed => write!(f, "closed"),
        }
    }
}

/// Which cursor variant a statement produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CursorKind {
    #[default]
    ForwardOnly,
    Scrollable,
}

/// Cursor construction settings
#[derive(Debug, Clone)]
pub struct CursorOptions {
    pub max_rows: Option<u64>,
    /// Rows per follow-up fetch; `None` leaves the page size to the backend
    pub fetch_size: Option<u32>,
    pub coercion: TypeCoercion,
}

impl Default for CursorOptions {
    fn default() -> Self {
        CursorOptions {
            max_rows: None,
            fetch_size: None,
            coercion: TypeCoercion::new(),
        }
    }
}

/// State shared by both cursor variants
#[derive(Debug)]
pub struct CursorCore {
    metadata: Arc<ResultMetadata>,
    coercion: TypeCoercion,
    job: SharedJobHandle,
    entry: Option<RegistryEntry>,
}

impl CursorCore {
    pub fn new(schema: &[Field], coercion: TypeCoercion, job: SharedJobHandle, entry: Option<RegistryEntry>) -> Self {
        CursorCore {
            metadata: Arc::new(ResultMetadata::from_schema(schema)),
            coercion,
            job,
            entry,
        }
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    pub fn coercion(&self) -> &TypeCoercion {
        &self.coercion
    }

    /// Copy of the job handle as currently known
    pub fn job_snapshot(&self) -> JobHandle {
        self.job.read().clone()
    }

    pub fn field(&self, column: ColumnIndex) -> CursorResult<&Field> {
        Ok(&self.metadata.column(column)?.field)
    }

    /// Drop the registry entry; later calls do nothing
    pub(crate) fn release(&mut self) {
        if let Some(entry) = self.entry.take() {
            entry.release();
        }
    }
}

/// Row cursor over a query result. Column indices are 1-based.
pub trait RowCursor: Send {
    /// Advance one row; `false` once past the last row
    fn next(&mut self) -> CursorResult<bool>;

    fn previous(&mut self) -> CursorResult<bool>;

    fn first(&mut self) -> CursorResult<bool>;

    fn last(&mut self) -> CursorResult<bool>;

    fn before_first(&mut self) -> CursorResult<()>;

    fn after_last(&mut self) -> CursorResult<()>;

    /// Move to a 1-based row; negative values count back from the end
    fn absolute(&mut self, row: i64) -> CursorResult<bool>;

    fn relative(&mut self, delta: i64) -> CursorResult<bool>;

    fn position(&self) -> CursorPosition;

    /// Cells of the current row
    fn row(&self) -> CursorResult<&[Cell]>;

    /// Page size hint for subsequent fetches
    fn set_fetch_size(&mut self, size: u32) -> CursorResult<()>;

    fn is_forward_only(&self) -> bool;

    /// Release resources; idempotent
    fn close(&mut self);

    fn core(&self) -> &CursorCore;

    fn is_closed(&self) -> bool {
        self.position() == CursorPosition::Closed
    }

    fn metadata(&self) -> &ResultMetadata {
        self.core().metadata()
    }

    /// Snapshot of the job the rows came from
    fn job(&self) -> JobHandle {
        self.core().job_snapshot()
    }

    fn find_column(&self, label: &str) -> CursorResult<ColumnIndex> {
        if self.is_closed() {
            return Err(CursorError::Closed);
        }
        self.metadata()
            .find_column(label)
            .ok_or_else(|| CursorError::ColumnNotFound(label.to_string()))
    }

    /// Raw cell and its field at a 1-based column of the current row
    fn cell(&self, column: ColumnIndex) -> CursorResult<(&Cell, &Field)> {
        let row = self.row()?;
        let field = self.core().field(column)?;
        let cell = row.get(column - 1).ok_or(CursorError::ColumnOutOfRange {
            index: column,
            count: row.len(),
        })?;
        Ok((cell, field))
    }

    fn get_string(&self, column: ColumnIndex) -> CursorResult<Option<String>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_canonical_string(cell, field)?)
    }

    fn get_object(&self, column: ColumnIndex) -> CursorResult<Value> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_value(cell, field)?)
    }

    fn get_i64(&self, column: ColumnIndex) -> CursorResult<Option<i64>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_i64(cell, field)?)
    }

    fn get_f64(&self, column: ColumnIndex) -> CursorResult<Option<f64>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_f64(cell, field)?)
    }

    fn get_bool(&self, column: ColumnIndex) -> CursorResult<Option<bool>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_bool(cell, field)?)
    }

    fn get_decimal(&self, column: ColumnIndex) -> CursorResult<Option<BigDecimal>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_decimal(cell, field)?)
    }

    fn get_timestamp(&self, column: ColumnIndex) -> CursorResult<Option<DateTime<Utc>>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_timestamp(cell, field)?)
    }

    fn get_datetime(&self, column: ColumnIndex) -> CursorResult<Option<NaiveDateTime>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_datetime(cell, field)?)
    }

    fn get_date(&self, column: ColumnIndex) -> CursorResult<Option<NaiveDate>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_date(cell, field)?)
    }

    fn get_time(&self, column: ColumnIndex) -> CursorResult<Option<NaiveTime>> {
        let (cell, field) = self.cell(column)?;
        Ok(self.core().coercion().to_time(cell, field)?)
    }
}

/// Wrap a finished execution in the requested cursor variant
pub fn open(result: ExecutionResult, kind: CursorKind, options: CursorOptions) -> QueryResult<Box<dyn RowCursor>> {
    match kind {
        CursorKind::ForwardOnly => Ok(Box::new(StreamingCursor::new(result, options))),
        CursorKind::Scrollable => Ok(Box::new(MaterializedCursor::new(result, options)?)),
    }
}
