use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use anyhow::Result;
use bqdriver::backend::memory::{Completion, InMemoryJobService};
use bqdriver::backend::{
    BackendError, BiEngineReason, BiEngineStatistics, Credential, JobReference, JobService, JobSnapshot,
    QueryRequest, QueryResponse, TransportError, TransportResult,
};
use bqdriver::backend::error::REASON_BILLING_TIER;
use bqdriver::config::parse_labels;
use bqdriver::query::{ExecutionPhase, Query, QueryError, QueryExecutor};
use bqdriver::session::SessionRegistry;
use bqdriver::types::{Field, FieldKind};
use bqdriver::{Connection, CursorKind};

// Declare the common module for test utilities using a path attribute
#[path = "../common/mod.rs"]
mod common;
use common::{connect_with, fast_schedule, numbers_script, setup, test_config, PROJECT_ID};

/// Answers every submission as complete and stateless, yet with a page token
struct TokenedStatelessService;

impl JobService for TokenedStatelessService {
    fn insert_query(&self, _credential: &Credential, _request: &QueryRequest) -> TransportResult<QueryResponse> {
        Ok(QueryResponse {
            query_id: Some(format!("{}!1", PROJECT_ID)),
            job_complete: true,
            schema: Some(vec![Field::new("n", FieldKind::Int64)]),
            page_token: Some("10".to_string()),
            ..QueryResponse::default()
        })
    }

    fn get_job(&self, _credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot> {
        Err(TransportError::Connection(format!("unexpected poll of {}", job)))
    }

    fn get_query_results(
        &self,
        _credential: &Credential,
        job: &JobReference,
        _page_token: Option<&str>,
        _max_results: Option<u32>,
    ) -> TransportResult<QueryResponse> {
        Err(TransportError::Connection(format!("unexpected fetch of {}", job)))
    }

    fn cancel_job(&self, _credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot> {
        Err(TransportError::Connection(format!("unexpected cancel of {}", job)))
    }
}

/// Reports `notFound` for the first few status polls, then defers to the inner service
struct LaggingService {
    inner: Arc<InMemoryJobService>,
    misses: AtomicUsize,
}

impl JobService for LaggingService {
    fn insert_query(&self, credential: &Credential, request: &QueryRequest) -> TransportResult<QueryResponse> {
        self.inner.insert_query(credential, request)
    }

    fn get_job(&self, credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot> {
        let remaining = self.misses.load(Ordering::SeqCst);
        if remaining > 0 {
            self.misses.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::new("notFound", format!("Not found: Job {}", job.job_id)).into());
        }
        self.inner.get_job(credential, job)
    }

    fn get_query_results(
        &self,
        credential: &Credential,
        job: &JobReference,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> TransportResult<QueryResponse> {
        self.inner.get_query_results(credential, job, page_token, max_results)
    }

    fn cancel_job(&self, credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot> {
        self.inner.cancel_job(credential, job)
    }
}

#[test]
fn test_sync_query_returns_first_page() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(3));

    let statement = connection.create_statement()?;
    let mut cursor = statement.execute_query("SELECT n")?;
    let mut values = Vec::new();
    while cursor.next()? {
        values.push(cursor.get_i64(1)?.unwrap_or_default());
    }

    assert_eq!(values, vec![1, 2, 3]);
    assert_eq!(service.insert_calls(), 1);
    assert_eq!(service.get_job_calls(), 0);
    let job = cursor.job();
    assert!(job.is_done());
    assert!(job.job_id().is_some());
    assert_eq!(service.last_request().map(|r| r.timeout_ms), Some(10_000));
    Ok(())
}

#[test]
fn test_async_query_polls_until_done() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(4).completion(Completion::AfterPolls(3)));

    let statement = connection.create_statement()?;
    let mut cursor = statement.execute_query("SELECT n")?;
    assert_eq!(service.get_job_calls(), 3);

    let mut count = 0;
    while cursor.next()? {
        count += 1;
    }
    assert_eq!(count, 4);

    let job = cursor.job();
    assert!(job.creation_time().is_some());
    assert!(job.start_time().is_some());
    assert!(job.end_time().is_some());
    assert!(job.running_duration().is_some());
    Ok(())
}

#[test]
fn test_missing_job_reference_is_permanent_error() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(1).completion(Completion::Never).omit_job_reference());

    let statement = connection.create_statement()?;
    let err = statement.execute_query("SELECT n").err().expect("query should fail");
    assert!(matches!(err, QueryError::MissingJobReference));
    assert_eq!(service.get_job_calls(), 0);
    assert_eq!(connection.running_query_count(), 0);
    Ok(())
}

#[test]
fn test_snapshot_without_statistics_or_reference_is_malformed() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(1).completion(Completion::Never).malformed_snapshot());

    let statement = connection.create_statement()?;
    let err = statement.execute_query("SELECT n").err().expect("query should fail");
    assert!(matches!(err, QueryError::MalformedJob(_)), "unexpected error: {}", err);
    assert_eq!(service.get_job_calls(), 1);
    Ok(())
}

#[test]
fn test_billing_limit_on_submission() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT n", numbers_script(1).bytes_billed(5_000_000));

    let statement = connection.create_statement()?;
    statement.set_max_billing_bytes(1_000)?;
    let err = statement.execute_query("SELECT n").err().expect("query should fail");
    match &err {
        QueryError::BillingLimitExceeded { limit, .. } => assert_eq!(*limit, Some(1_000)),
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("1000"));
    assert_eq!(service.last_request().and_then(|r| r.maximum_bytes_billed), Some(1_000));
    Ok(())
}

#[test]
fn test_billing_limit_reported_when_job_finishes() -> Result<()> {
    let (service, connection) = setup()?;
    service.script(
        "SELECT n",
        numbers_script(1).bytes_billed(5_000_000).completion(Completion::AfterPolls(2)),
    );

    let statement = connection.create_statement()?;
    statement.set_max_billing_bytes(2_048)?;
    let err = statement.execute_query("SELECT n").err().expect("query should fail");
    assert!(matches!(err, QueryError::BillingLimitExceeded { limit: Some(2_048), .. }), "unexpected error: {}", err);
    Ok(())
}

#[test]
fn test_billing_tier_rejection_without_configured_limit() -> Result<()> {
    let (service, connection) = setup()?;
    let tier = BackendError::new(REASON_BILLING_TIER, "Billing tier limit exceeded");
    service.script("SELECT n", numbers_script(1).completion(Completion::AfterPolls(1)).fail_with(tier));

    let statement = connection.create_statement()?;
    let err = statement.execute_query("SELECT n").err().expect("query should fail");
    assert!(matches!(err, QueryError::BillingLimitExceeded { limit: None, .. }), "unexpected error: {}", err);
    assert!(!err.to_string().contains("0 bytes"), "{}", err);
    assert_eq!(service.last_request().and_then(|r| r.maximum_bytes_billed), None);
    Ok(())
}

#[test]
fn test_unlimited_billing_sends_no_limit() -> Result<()> {
    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    let config = test_config().with_max_billing_bytes(1_000).with_unlimited_billing(true);
    let connection = connect_with(service.clone(), config)?;
    service.script("SELECT n", numbers_script(1).bytes_billed(5_000_000));

    let statement = connection.create_statement()?;
    let mut cursor = statement.execute_query("SELECT n")?;
    assert!(cursor.next()?);
    assert_eq!(service.last_request().and_then(|r| r.maximum_bytes_billed), None);
    Ok(())
}

#[test]
fn test_failed_job_surfaces_backend_message() -> Result<()> {
    let (service, connection) = setup()?;
    service.script(
        "SELECT n",
        numbers_script(1)
            .completion(Completion::AfterPolls(1))
            .fail_with(BackendError::new("invalidQuery", "Division by zero: 1 / 0")),
    );

    let statement = connection.create_statement()?;
    let err = statement.execute_query("SELECT n").err().expect("query should fail");
    match err {
        QueryError::QueryFailed(message) => assert_eq!(message, "Division by zero: 1 / 0"),
        other => panic!("unexpected error: {}", other),
    }
    Ok(())
}

#[test]
fn test_submission_error_carries_backend_message() -> Result<()> {
    let (_service, connection) = setup()?;
    let statement = connection.create_statement()?;
    let err = statement.execute_query("SELECT unknown").err().expect("query should fail");
    match err {
        QueryError::Submission { detail, .. } => assert!(detail.starts_with("Unrecognized query")),
        other => panic!("unexpected error: {}", other),
    }
    Ok(())
}

#[test]
fn test_labels_merge_connection_and_call() -> Result<()> {
    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    let config = test_config().with_labels(parse_labels("team=data,env=prod")?);
    let connection = connect_with(service.clone(), config)?;
    service.script("SELECT n", numbers_script(1));

    let statement = connection.create_statement()?;
    statement.set_labels(parse_labels("env=dev,owner=etl")?)?;
    let cursor = statement.execute_query("SELECT n")?;

    let sent = service.last_request().map(|r| r.labels).unwrap_or_default();
    assert_eq!(sent, parse_labels("team=data,env=dev,owner=etl")?);
    assert_eq!(cursor.job().labels(), &sent);
    Ok(())
}

#[test]
fn test_stateless_query_has_no_job_id() -> Result<()> {
    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    let connection = connect_with(service.clone(), test_config().with_stateless_queries(true))?;
    service.script("SELECT n", numbers_script(3).stateless());

    for kind in [CursorKind::ForwardOnly, CursorKind::Scrollable] {
        let statement = connection.create_statement()?;
        statement.set_cursor_kind(kind);
        let mut cursor = statement.execute_query("SELECT n")?;
        let job = cursor.job();
        assert_eq!(job.job_id(), None);
        assert!(job.query_id().is_some_and(|id| id.contains('!')));
        assert!(job.is_stateless());

        let mut count = 0;
        while cursor.next()? {
            count += 1;
        }
        assert_eq!(count, 3);
    }
    Ok(())
}

#[test]
fn test_stateless_response_with_page_token_is_malformed() -> Result<()> {
    let registry = Arc::new(SessionRegistry::new());
    let executor = QueryExecutor::new(
        Arc::new(TokenedStatelessService),
        Credential::bearer("t"),
        registry.clone(),
        fast_schedule(),
    );
    let query = Query::builder("SELECT n", &test_config().with_stateless_queries(true)).build()?;
    let err = executor.execute(&query).err().expect("execution should fail");
    assert!(matches!(err, QueryError::MalformedResponse(_)));
    assert_eq!(executor.phase(), ExecutionPhase::Failed);
    assert!(registry.is_empty());
    Ok(())
}

#[test]
fn test_job_not_yet_visible_is_retried() -> Result<()> {
    let inner = Arc::new(InMemoryJobService::new(PROJECT_ID));
    inner.script("SELECT n", numbers_script(2).completion(Completion::AfterPolls(1)));
    let service = Arc::new(LaggingService { inner: inner.clone(), misses: AtomicUsize::new(2) });
    let connection = Connection::open(test_config(), service, Credential::bearer("t"))?;

    let statement = connection.create_statement()?;
    let mut cursor = statement.execute_query("SELECT n")?;
    assert!(cursor.next()?);
    assert_eq!(inner.get_job_calls(), 1);
    Ok(())
}

#[test]
fn test_cache_hit_follows_bytes_processed() -> Result<()> {
    let (service, connection) = setup()?;
    service.script("SELECT cached", numbers_script(2).bytes_processed(0));
    service.script("SELECT fresh", numbers_script(2).bytes_processed(4_096).completion(Completion::AfterPolls(1)));

    for kind in [CursorKind::ForwardOnly, CursorKind::Scrollable] {
        for sql in ["SELECT cached", "SELECT fresh"] {
            let statement = connection.create_statement()?;
            statement.set_cursor_kind(kind);
            let cursor = statement.execute_query(sql)?;
            let job = cursor.job();
            assert!(job.is_done());
            assert_eq!(job.cache_hit(), job.total_bytes_processed() == Some(0), "{} via {:?}", sql, kind);
        }
    }
    Ok(())
}

#[test]
fn test_bi_engine_statistics_are_exposed() -> Result<()> {
    let (service, connection) = setup()?;
    let statistics = BiEngineStatistics {
        mode: "PARTIAL".to_string(),
        reasons: vec![BiEngineReason {
            code: "UNSUPPORTED_SQL_TEXT".to_string(),
            message: "Window functions are not accelerated".to_string(),
        }],
    };
    service.script("SELECT n", numbers_script(1).completion(Completion::AfterPolls(1)).bi_engine(statistics));

    let statement = connection.create_statement()?;
    let cursor = statement.execute_query("SELECT n")?;
    let job = cursor.job();
    assert_eq!(job.bi_engine_mode(), Some("PARTIAL"));
    assert_eq!(job.bi_engine_reasons().len(), 1);
    assert_eq!(job.bi_engine_reasons()[0].code, "UNSUPPORTED_SQL_TEXT");
    Ok(())
}

#[test]
fn test_request_reflects_statement_options() -> Result<()> {
    let service = Arc::new(InMemoryJobService::new(PROJECT_ID));
    let config = test_config().with_location("EU").with_legacy_sql(true).with_query_cache(false);
    let connection = connect_with(service.clone(), config)?;
    service.script("SELECT n", numbers_script(1));

    let statement = connection.create_statement()?;
    statement.set_query_timeout_ms(60_000)?;
    statement.set_fetch_size(250)?;
    statement.execute_query("SELECT n")?;

    let request = service.last_request().expect("request recorded");
    assert!(request.use_legacy_sql);
    assert!(!request.use_query_cache);
    assert_eq!(request.location.as_deref(), Some("EU"));
    assert_eq!(request.job_timeout_ms, Some(60_000));
    assert_eq!(request.max_results, Some(250));
    Ok(())
}
