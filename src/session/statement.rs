// Statement
//
// Per-statement options and execution. Each execution gets a fresh executor;
// the current one is kept so another thread can cancel it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use chrono::FixedOffset;
use log::debug;
use parking_lot::Mutex;

use crate::config::{check_positive, validate_labels, ConfigError, ConfigResult, ConnectionConfig, Labels};
use crate::cursor::{self, CursorKind, CursorOptions, RowCursor};
use crate::query::{Query, QueryError, QueryExecutor, QueryResult};
use crate::session::connection::ConnectionShared;
use crate::types::TypeCoercion;

/// Settings applied to each execution of a statement
#[derive(Debug, Clone, PartialEq)]
pub struct StatementOptions {
    pub max_rows: Option<u64>,
    pub fetch_size: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_billing_bytes: Option<i64>,
    /// Call-level labels, merged over the connection's
    pub labels: Labels,
    pub cursor: CursorKind,
    /// Zone TIMESTAMP strings are rendered in
    pub reporting_offset: Option<FixedOffset>,
}

impl StatementOptions {
    fn from_config(config: &ConnectionConfig) -> Self {
        StatementOptions {
            max_rows: config.max_rows,
            fetch_size: config.fetch_size,
            timeout_ms: config.timeout_ms,
            max_billing_bytes: config.max_billing_bytes,
            labels: Labels::new(),
            cursor: CursorKind::ForwardOnly,
            reporting_offset: None,
        }
    }
}

pub struct Statement {
    shared: Arc<ConnectionShared>,
    options: Mutex<StatementOptions>,
    current: Mutex<Option<Arc<QueryExecutor>>>,
    closed: AtomicBool,
}

impl Statement {
    pub(crate) fn new(shared: Arc<ConnectionShared>) -> Self {
        let options = StatementOptions::from_config(&shared.config.read());
        Statement {
            shared,
            options: Mutex::new(options),
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> StatementOptions {
        self.options.lock().clone()
    }

    pub fn set_max_rows(&self, max_rows: u64) -> ConfigResult<()> {
        check_positive("maxRows", Some(max_rows as i64))?;
        self.options.lock().max_rows = Some(max_rows);
        Ok(())
    }

    pub fn set_fetch_size(&self, fetch_size: u32) -> ConfigResult<()> {
        check_positive("fetchSize", Some(fetch_size as i64))?;
        self.options.lock().fetch_size = Some(fetch_size);
        Ok(())
    }

    pub fn set_query_timeout_ms(&self, timeout_ms: u64) -> ConfigResult<()> {
        check_positive("timeoutMs", Some(timeout_ms as i64))?;
        self.options.lock().timeout_ms = Some(timeout_ms);
        Ok(())
    }

    pub fn set_max_billing_bytes(&self, bytes: i64) -> ConfigResult<()> {
        check_positive("maxBillingBytes", Some(bytes))?;
        self.options.lock().max_billing_bytes = Some(bytes);
        Ok(())
    }

    pub fn set_labels(&self, labels: Labels) -> ConfigResult<()> {
        validate_labels(&labels)?;
        self.options.lock().labels = labels;
        Ok(())
    }

    pub fn set_cursor_kind(&self, kind: CursorKind) {
        self.options.lock().cursor = kind;
    }

    pub fn set_reporting_offset(&self, offset: FixedOffset) {
        self.options.lock().reporting_offset = Some(offset);
    }

    fn build_query(&self, sql: &str, options: &StatementOptions) -> ConfigResult<Query> {
        if sql.trim().is_empty() {
            return Err(ConfigError::invalid("sql", sql, "query text is empty"));
        }
        let config = self.shared.config.read();
        let mut builder = Query::builder(sql, &config).labels(options.labels.clone());
        if let Some(size) = options.fetch_size {
            builder = builder.page_size(size);
        }
        if let Some(timeout_ms) = options.timeout_ms {
            builder = builder.timeout_ms(timeout_ms);
        }
        if let Some(bytes) = options.max_billing_bytes {
            builder = builder.max_billing_bytes(bytes);
        }
        builder.build()
    }

    /// Execute `sql` and return a cursor over its result
    pub fn execute_query(&self, sql: &str) -> QueryResult<Box<dyn RowCursor>> {
        if self.closed.load(Ordering::SeqCst) || self.shared.is_closed() {
            return Err(QueryError::Closed);
        }
        let options = self.options();
        let query = self.build_query(sql, &options)?;
        let schedule = self.shared.config.read().poll_schedule;

        let executor = Arc::new(QueryExecutor::new(
            Arc::clone(&self.shared.service),
            self.shared.credential.clone(),
            Arc::clone(&self.shared.registry),
            schedule,
        ));
        if let Some(previous) = self.current.lock().replace(Arc::clone(&executor)) {
            debug!("[EXECUTOR] Replacing executor {} with {}", previous.id(), executor.id());
            previous.close();
        }

        let result = executor.execute(&query)?;
        let coercion = match options.reporting_offset {
            Some(offset) => TypeCoercion::with_reporting_offset(offset),
            None => TypeCoercion::new(),
        };
        cursor::open(
            result,
            options.cursor,
            CursorOptions {
                max_rows: options.max_rows,
                fetch_size: options.fetch_size,
                coercion,
            },
        )
    }

    /// Cancel the running execution, if any; callable from any thread
    pub fn cancel(&self) -> QueryResult<()> {
        let current = self.current.lock().clone();
        match current {
            Some(executor) => executor.cancel(),
            None => Ok(()),
        }
    }

    /// Close the statement and its current executor; idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(executor) = self.current.lock().take() {
            executor.close();
        }
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.close();
    }
}
