use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;
use bqdriver::backend::memory::{Completion, InMemoryJobService};
use bqdriver::config::{parse_labels, ConfigError, ConnectionConfig};
use bqdriver::query::QueryError;
use bqdriver::{Connection, Credential};

// Declare the common module for test utilities using a path attribute
#[path = "../common/mod.rs"]
mod common;
use common::{connect_with, fast_schedule, numbers_script, setup, wait_until, PROJECT_ID};

const WAIT: Duration = Duration::from_secs(5);

fn properties(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Start `sql` on its own statement in a background thread
fn spawn_query(connection: &Connection, sql: &'static str) -> Result<thread::JoinHandle<Result<usize, QueryError>>> {
    let statement = connection.create_statement()?;
    Ok(thread::spawn(move || -> Result<usize, QueryError> {
        let mut cursor = statement.execute_query(sql)?;
        let mut rows = 0;
        while cursor.next().map_err(|e| QueryError::InvalidState(e.to_string()))? {
            rows += 1;
        }
        Ok(rows)
    }))
}

fn jobs_submitted(connection: &Connection) -> usize {
    connection.registry().entries().iter().filter(|entry| entry.job.is_some()).count()
}

#[test]
fn test_cancel_all_stops_every_running_query() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(1).completion(Completion::Never));

    let workers = (0..4)
        .map(|_| spawn_query(&connection, "SELECT n"))
        .collect::<Result<Vec<_>>>()?;

    wait_until(WAIT, || jobs_submitted(&connection) == 4)?;
    assert_eq!(connection.running_query_count(), 4);
    assert_eq!(connection.cancel_all(), 4);

    for worker in workers {
        let outcome = worker.join().expect("worker panicked");
        assert!(matches!(outcome, Err(QueryError::Cancelled { .. })), "unexpected outcome: {:?}", outcome);
    }
    assert_eq!(service.cancel_calls(), 4);
    assert_eq!(connection.running_query_count(), 0);
    assert!(connection.registry().is_empty());
    // Nothing left to cancel
    assert_eq!(connection.cancel_all(), 0);
    Ok(())
}

#[test]
fn test_finished_queries_are_not_running() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(3).completion(Completion::AfterPolls(2)));

    let statement = connection.create_statement()?;
    let _cursor = statement.execute_query("SELECT n")?;
    assert_eq!(connection.registry().len(), 1);
    assert_eq!(connection.running_query_count(), 0);
    assert_eq!(connection.cancel_all(), 0);
    assert_eq!(service.cancel_calls(), 0);
    Ok(())
}

#[test]
fn test_closing_connection_cancels_running_queries() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(1).completion(Completion::Never));

    let worker = spawn_query(&connection, "SELECT n")?;
    let idle = connection.create_statement()?;
    wait_until(WAIT, || jobs_submitted(&connection) == 1)?;

    connection.close();
    connection.close();
    assert!(connection.is_closed());

    let outcome = worker.join().expect("worker panicked");
    assert!(matches!(outcome, Err(QueryError::Cancelled { .. })));
    assert_eq!(service.cancel_calls(), 1);
    assert!(matches!(connection.create_statement(), Err(QueryError::Closed)));
    assert!(matches!(idle.execute_query("SELECT n"), Err(QueryError::Closed)));
    Ok(())
}

#[test]
fn test_connection_from_properties() -> Result<()> {
    let props = properties(&[
        ("ProjectId", PROJECT_ID),
        ("Location", "EU"),
        ("Labels", "team=data,env=prod"),
        ("FetchSize", "500"),
        ("MaxRows", "1000"),
        ("UseQueryCache", "false"),
        ("TimeoutMs", "60000"),
    ]);
    let config = ConnectionConfig::from_properties(&props)?.with_poll_schedule(fast_schedule());
    assert_eq!(config.fetch_size, Some(500));
    assert_eq!(config.max_rows, Some(1000));

    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    service.script("SELECT n", numbers_script(2));
    let connection = connect_with(service.clone(), config)?;
    assert_eq!(connection.labels(), parse_labels("team=data,env=prod")?);

    let statement = connection.create_statement()?;
    let options = statement.options();
    assert_eq!(options.fetch_size, Some(500));
    assert_eq!(options.max_rows, Some(1000));
    assert_eq!(options.timeout_ms, Some(60_000));

    let _cursor = statement.execute_query("SELECT n")?;
    let request = service.last_request().expect("request sent");
    assert_eq!(request.location.as_deref(), Some("EU"));
    assert_eq!(request.max_results, Some(500));
    assert!(!request.use_query_cache);
    assert_eq!(request.labels, parse_labels("team=data,env=prod")?);
    Ok(())
}

#[test]
fn test_invalid_properties_are_rejected() {
    let cases: [(&[(&str, &str)], fn(&ConfigError) -> bool); 5] = [
        (&[("location", "EU")], |e| matches!(e, ConfigError::Missing(_))),
        (&[("projectId", "p"), ("fetchSize", "0")], |e| matches!(e, ConfigError::NonPositive { value: 0, .. })),
        (&[("projectId", "p"), ("timeoutMs", "soon")], |e| matches!(e, ConfigError::Invalid { .. })),
        (&[("projectId", "p"), ("labels", "Team=data")], |e| matches!(e, ConfigError::InvalidLabel { .. })),
        (&[("projectId", "p"), ("useLegacySql", "maybe")], |e| matches!(e, ConfigError::Invalid { .. })),
    ];
    for (pairs, expected) in cases {
        let err = ConnectionConfig::from_properties(&properties(pairs)).expect_err("properties should be rejected");
        assert!(expected(&err), "unexpected error for {:?}: {}", pairs, err);
    }
}

#[test]
fn test_open_validates_config() {
    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    let config = ConnectionConfig::new(PROJECT_ID).with_fetch_size(0);
    let result = Connection::open(config, service, Credential::bearer("test-token"));
    assert!(matches!(result, Err(ConfigError::NonPositive { .. })));
}

#[test]
fn test_statement_setters_reject_non_positive_values() -> Result<()> {
    let (_, connection) = setup()?;
    let statement = connection.create_statement()?;
    let before = statement.options();

    assert!(matches!(statement.set_max_rows(0), Err(ConfigError::NonPositive { .. })));
    assert!(matches!(statement.set_fetch_size(0), Err(ConfigError::NonPositive { .. })));
    assert!(matches!(statement.set_query_timeout_ms(0), Err(ConfigError::NonPositive { .. })));
    assert!(matches!(statement.set_max_billing_bytes(-5), Err(ConfigError::NonPositive { value: -5, .. })));
    assert!(matches!(
        statement.set_labels(parse_labels("owner=etl")?.into_iter().chain([("Bad".to_string(), "x".to_string())]).collect()),
        Err(ConfigError::InvalidLabel { .. })
    ));
    assert_eq!(statement.options(), before);

    statement.set_max_rows(10)?;
    statement.set_fetch_size(100)?;
    assert_eq!(statement.options().max_rows, Some(10));
    assert_eq!(statement.options().fetch_size, Some(100));
    Ok(())
}

#[test]
fn test_empty_sql_is_rejected() -> Result<()> {
    let (service, connection) = setup()?;
    let statement = connection.create_statement()?;
    assert!(matches!(
        statement.execute_query("   "),
        Err(QueryError::Config(ConfigError::Invalid { .. }))
    ));
    assert_eq!(service.insert_calls(), 0);
    Ok(())
}

#[test]
fn test_connection_labels_apply_to_later_queries() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(1));

    assert!(connection.set_labels(parse_labels("team=data")?).is_ok());
    assert!(matches!(
        connection.set_labels([("9lives".to_string(), "x".to_string())].into_iter().collect()),
        Err(ConfigError::InvalidLabel { .. })
    ));
    assert_eq!(connection.labels(), parse_labels("team=data")?);

    let statement = connection.create_statement()?;
    let _cursor = statement.execute_query("SELECT n")?;
    let request = service.last_request().expect("request sent");
    assert_eq!(request.labels, parse_labels("team=data")?);
    Ok(())
}

#[test]
fn test_reexecution_replaces_registry_entry() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(2));

    let statement = connection.create_statement()?;
    let _first = statement.execute_query("SELECT n")?;
    let first_id = connection.registry().entries()[0].executor_id;

    let _second = statement.execute_query("SELECT n")?;
    let entries = connection.registry().entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].executor_id > first_id);
    assert!(entries[0].job.is_some());
    assert!(!entries[0].cancel_requested);

    statement.close();
    assert!(connection.registry().is_empty());
    Ok(())
}
