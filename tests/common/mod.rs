#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{anyhow, Result};
use bqdriver::backend::memory::{InMemoryJobService, ScriptedQuery};
use bqdriver::config::{ConnectionConfig, PollSchedule};
use bqdriver::types::{Cell, Field, FieldKind};
use bqdriver::{Connection, Credential};

pub const PROJECT_ID: &str = "test-project";

pub const TOP_WORDS_SQL: &str = "SELECT TOP(word, 10), COUNT(*) FROM samples.shakespeare WHERE LENGTH(word) > 3";

pub const TOP_WORDS: [&str; 10] = ["you", "yet", "would", "world", "without", "with", "will", "why", "whose", "whom"];

// Route driver logs to the test output when RUST_LOG is set
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

// Poll schedule short enough to keep async tests fast
pub fn fast_schedule() -> PollSchedule {
    PollSchedule::new(Duration::from_millis(2), 1.5, Duration::from_millis(20)).expect("valid schedule")
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new(PROJECT_ID).with_poll_schedule(fast_schedule())
}

// Open a connection over the given service
pub fn connect_with(service: Arc<InMemoryJobService>, config: ConnectionConfig) -> Result<Connection> {
    init_logging();
    Ok(Connection::open(config, service, Credential::bearer("test-token"))?)
}

// Fresh service and connection with the default test configuration
pub fn setup() -> Result<(Arc<InMemoryJobService>, Connection)> {
    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    let connection = connect_with(service.clone(), test_config())?;
    Ok((service, connection))
}

pub fn top_words_schema() -> Vec<Field> {
    vec![Field::new("f0_", FieldKind::String), Field::new("count", FieldKind::Int64)]
}

pub fn top_words_script() -> ScriptedQuery {
    let rows = TOP_WORDS
        .iter()
        .map(|word| vec![Cell::from(*word), Cell::from(42i64)])
        .collect();
    ScriptedQuery::new(top_words_schema(), rows)
}

// Single INT64 column `n` holding 1..=count
pub fn numbers_script(count: i64) -> ScriptedQuery {
    let rows = (1..=count).map(|i| vec![Cell::from(i)]).collect();
    ScriptedQuery::new(vec![Field::new("n", FieldKind::Int64)], rows)
}

// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    Err(anyhow!("condition not met within {:?}", timeout))
}
