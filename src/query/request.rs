// Query Description
//
// The immutable description of one query execution and its translation into
// a job-service submission.

use serde::{Serialize, Deserialize};

use crate::backend::{JobCreationMode, QueryRequest};
use crate::common::types::SYNC_TIMEOUT_MS;
use crate::config::{check_positive, merge_labels, validate_labels, ConfigResult, ConnectionConfig, Labels};

/// SQL dialect the backend should parse the text with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dialect {
    #[default]
    Standard,
    Legacy,
}

/// Immutable query description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    sql: String,
    dialect: Dialect,
    labels: Labels,
    max_billing_bytes: Option<i64>,
    timeout_ms: Option<u64>,
    location: Option<String>,
    unlimited_billing: bool,
    stateless_allowed: bool,
    use_query_cache: bool,
    page_size: Option<u32>,
}

impl Query {
    /// Start a query that inherits connection-level settings
    pub fn builder(sql: impl Into<String>, config: &ConnectionConfig) -> QueryBuilder {
        QueryBuilder {
            query: Query {
                sql: sql.into(),
                dialect: if config.use_legacy_sql { Dialect::Legacy } else { Dialect::Standard },
                labels: config.labels.clone(),
                max_billing_bytes: config.max_billing_bytes,
                timeout_ms: config.timeout_ms,
                location: config.location.clone(),
                unlimited_billing: config.unlimited_billing,
                stateless_allowed: config.stateless_queries,
                use_query_cache: config.use_query_cache,
                page_size: config.fetch_size,
            },
            call_labels: Labels::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Merged labels sent with the submission
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn page_size(&self) -> Option<u32> {
        self.page_size
    }

    pub fn stateless_allowed(&self) -> bool {
        self.stateless_allowed
    }

    /// Billing limit actually sent, `None` when unlimited
    pub fn billing_limit(&self) -> Option<i64> {
        if self.unlimited_billing {
            None
        } else {
            self.max_billing_bytes
        }
    }

    /// Submission request with the fixed synchronous window
    pub fn to_request(&self) -> QueryRequest {
        QueryRequest {
            query: self.sql.clone(),
            use_legacy_sql: self.dialect == Dialect::Legacy,
            labels: self.labels.clone(),
            maximum_bytes_billed: self.billing_limit(),
            timeout_ms: SYNC_TIMEOUT_MS,
            job_timeout_ms: self.timeout_ms,
            location: self.location.clone(),
            use_query_cache: self.use_query_cache,
            job_creation_mode: if self.stateless_allowed {
                JobCreationMode::Optional
            } else {
                JobCreationMode::Required
            },
            max_results: self.page_size,
        }
    }
}

/// Builder applying call-level overrides on top of connection settings
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    query: Query,
    call_labels: Labels,
}

impl QueryBuilder {
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.query.dialect = dialect;
        self
    }

    /// Call-level labels; these win over connection labels
    pub fn labels(mut self, labels: Labels) -> Self {
        self.call_labels = labels;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.call_labels.insert(key.into(), value.into());
        self
    }

    pub fn max_billing_bytes(mut self, bytes: i64) -> Self {
        self.query.max_billing_bytes = Some(bytes);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.query.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.query.location = Some(location.into());
        self
    }

    pub fn stateless_allowed(mut self, allowed: bool) -> Self {
        self.query.stateless_allowed = allowed;
        self
    }

    pub fn use_query_cache(mut self, enabled: bool) -> Self {
        self.query.use_query_cache = enabled;
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.query.page_size = Some(size);
        self
    }

    pub fn build(self) -> ConfigResult<Query> {
        let QueryBuilder { mut query, call_labels } = self;
        validate_labels(&call_labels)?;
        query.labels = merge_labels(&query.labels, &call_labels);
        check_positive("maxBillingBytes", query.max_billing_bytes)?;
        check_positive("timeoutMs", query.timeout_ms.map(|v| v as i64))?;
        check_positive("fetchSize", query.page_size.map(|v| v as i64))?;
        Ok(query)
    }
}
