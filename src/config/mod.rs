// Configuration Module
//
// Typed connection configuration parsed from a string property map, plus the
// backoff schedule used while polling asynchronous jobs.

pub mod error;
pub mod labels;

use std::collections::HashMap;
use std::time::Duration;
use serde::{Serialize, Deserialize};

pub use error::{ConfigError, ConfigResult};
pub use labels::{merge_labels, parse_labels, validate_label, validate_labels, Labels};

/// Backoff between job status polls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollSchedule {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule {
            initial: Duration::from_millis(100),
            multiplier: 1.5,
            max: Duration::from_secs(2),
        }
    }
}

impl PollSchedule {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> ConfigResult<Self> {
        if initial.is_zero() {
            return Err(ConfigError::NonPositive { key: "pollInitial".to_string(), value: 0 });
        }
        if !(multiplier >= 1.0 && multiplier.is_finite()) {
            return Err(ConfigError::invalid("pollMultiplier", &multiplier.to_string(), "must be a finite value >= 1"));
        }
        if max < initial {
            return Err(ConfigError::invalid("pollMax", &format!("{:?}", max), "must not be below the initial delay"));
        }
        Ok(PollSchedule { initial, multiplier, max })
    }

    /// Delay before the given poll attempt (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Connection-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub project_id: String,
    pub location: Option<String>,
    pub use_legacy_sql: bool,
    /// Job execution timeout
    pub timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_billing_bytes: Option<i64>,
    /// Ignore `max_billing_bytes` entirely
    pub unlimited_billing: bool,
    pub labels: Labels,
    pub stateless_queries: bool,
    pub use_query_cache: bool,
    /// Rows per result page; `None` leaves the page size to the backend
    pub fetch_size: Option<u32>,
    pub max_rows: Option<u64>,
    pub poll_schedule: PollSchedule,
}

impl ConnectionConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        ConnectionConfig {
            project_id: project_id.into(),
            location: None,
            use_legacy_sql: false,
            timeout_ms: None,
            read_timeout_ms: None,
            connect_timeout_ms: None,
            max_billing_bytes: None,
            unlimited_billing: false,
            labels: Labels::new(),
            stateless_queries: false,
            use_query_cache: true,
            fetch_size: None,
            max_rows: None,
            poll_schedule: PollSchedule::default(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_legacy_sql(mut self, legacy: bool) -> Self {
        self.use_legacy_sql = legacy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_billing_bytes(mut self, bytes: i64) -> Self {
        self.max_billing_bytes = Some(bytes);
        self
    }

    pub fn with_unlimited_billing(mut self, unlimited: bool) -> Self {
        self.unlimited_billing = unlimited;
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_stateless_queries(mut self, allowed: bool) -> Self {
        self.stateless_queries = allowed;
        self
    }

    pub fn with_query_cache(mut self, enabled: bool) -> Self {
        self.use_query_cache = enabled;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_poll_schedule(mut self, schedule: PollSchedule) -> Self {
        self.poll_schedule = schedule;
        self
    }

    /// Parse configuration from connection properties; keys are case-insensitive
    pub fn from_properties(properties: &HashMap<String, String>) -> ConfigResult<Self> {
        let props: HashMap<String, &str> = properties
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.trim()))
            .collect();

        let project_id = props
            .get("projectid")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing("projectId".to_string()))?;
        let mut config = ConnectionConfig::new(*project_id);

        config.location = props.get("location").filter(|v| !v.is_empty()).map(|v| v.to_string());
        if let Some(v) = props.get("uselegacysql") {
            config.use_legacy_sql = parse_flag("useLegacySql", v)?;
        }
        if let Some(v) = props.get("timeoutms") {
            config.timeout_ms = Some(parse_positive("timeoutMs", v)?);
        }
        if let Some(v) = props.get("readtimeout") {
            config.read_timeout_ms = Some(parse_positive("readTimeout", v)?);
        }
        if let Some(v) = props.get("connecttimeout") {
            config.connect_timeout_ms = Some(parse_positive("connectTimeout", v)?);
        }
        if let Some(v) = props.get("maxbillingbytes") {
            config.max_billing_bytes = Some(parse_positive::<i64>("maxBillingBytes", v)?);
        }
        if let Some(v) = props.get("unlimitedbillingbytes") {
            config.unlimited_billing = parse_flag("unlimitedBillingBytes", v)?;
        }
        if let Some(v) = props.get("labels") {
            config.labels = parse_labels(v)?;
        }
        if let Some(v) = props.get("statelessqueries") {
            config.stateless_queries = parse_flag("statelessQueries", v)?;
        }
        if let Some(v) = props.get("usequerycache") {
            config.use_query_cache = parse_flag("useQueryCache", v)?;
        }
        if let Some(v) = props.get("fetchsize") {
            config.fetch_size = Some(parse_positive("fetchSize", v)?);
        }
        if let Some(v) = props.get("maxrows") {
            config.max_rows = Some(parse_positive("maxRows", v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants `from_properties` enforces on a programmatically built config
    pub fn validate(&self) -> ConfigResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("projectId".to_string()));
        }
        check_positive("timeoutMs", self.timeout_ms.map(|v| v as i64))?;
        check_positive("readTimeout", self.read_timeout_ms.map(|v| v as i64))?;
        check_positive("connectTimeout", self.connect_timeout_ms.map(|v| v as i64))?;
        check_positive("maxBillingBytes", self.max_billing_bytes)?;
        check_positive("fetchSize", self.fetch_size.map(|v| v as i64))?;
        check_positive("maxRows", self.max_rows.map(|v| v as i64))?;
        validate_labels(&self.labels)
    }
}

/// Fail with `NonPositive` when a supplied value is zero or negative
pub fn check_positive(key: &str, value: Option<i64>) -> ConfigResult<()> {
    match value {
        Some(v) if v <= 0 => Err(ConfigError::NonPositive { key: key.to_string(), value: v }),
        _ => Ok(()),
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> ConfigResult<T>
where
    T: TryFrom<i64>,
{
    let value: i64 = raw
        .parse()
        .map_err(|_| ConfigError::invalid(key, raw, "not an integer"))?;
    check_positive(key, Some(value))?;
    T::try_from(value).map_err(|_| ConfigError::invalid(key, raw, "out of range"))
}

fn parse_flag(key: &str, raw: &str) -> ConfigResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected true or false")),
    }
}
