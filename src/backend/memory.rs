// In-Memory Job Service
//
// A scripted, in-process job service. Each SQL text is bound to a
// `ScriptedQuery` describing how the backend should behave for it: when the
// job completes, which rows it returns, and which faults to inject. Every
// outbound call is counted so callers can assert on RPC traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use chrono::Utc;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use crate::backend::error::{BackendError, TransportError, TransportResult, REASON_BILLING_LIMIT, REASON_NOT_FOUND, REASON_STOPPED};
use crate::backend::model::{
    BiEngineStatistics, JobCreationMode, JobReference, JobSnapshot, JobState, JobStatistics, JobStatus, QueryRequest,
    QueryResponse,
};
use crate::backend::{Credential, JobService};
use crate::common::types::{DEFAULT_FETCH_SIZE, STATELESS_QUERY_ID_DELIMITER};
use crate::types::{Cell, Field};

/// When a scripted job reaches DONE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Within the synchronous window
    Immediate,
    /// After the given number of status polls
    AfterPolls(u32),
    /// Only through cancellation
    Never,
}

/// Backend behavior for one SQL text
#[derive(Debug, Clone)]
pub struct ScriptedQuery {
    schema: Vec<Field>,
    rows: Vec<Vec<Cell>>,
    completion: Completion,
    total_bytes_processed: i64,
    cache_hit: Option<bool>,
    bytes_billed: i64,
    bi_engine: Option<BiEngineStatistics>,
    failure: Option<BackendError>,
    omit_job_reference: bool,
    malformed_snapshot: bool,
    stateless: bool,
    submission_gate: Option<Receiver<()>>,
}

impl ScriptedQuery {
    pub fn new(schema: Vec<Field>, rows: Vec<Vec<Cell>>) -> Self {
        ScriptedQuery {
            schema,
            rows,
            completion: Completion::Immediate,
            total_bytes_processed: 1024,
            cache_hit: None,
            bytes_billed: 0,
            bi_engine: None,
            failure: None,
            omit_job_reference: false,
            malformed_snapshot: false,
            stateless: false,
            submission_gate: None,
        }
    }

    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    /// Bytes processed reported in statistics; 0 reads as a cache hit
    pub fn bytes_processed(mut self, bytes: i64) -> Self {
        self.total_bytes_processed = bytes;
        self
    }

    /// Report an explicit cache-hit flag instead of leaving it derived
    pub fn cache_hit(mut self, hit: bool) -> Self {
        self.cache_hit = Some(hit);
        self
    }

    /// Bytes the query would bill; compared with the request's limit
    pub fn bytes_billed(mut self, bytes: i64) -> Self {
        self.bytes_billed = bytes;
        self
    }

    pub fn bi_engine(mut self, statistics: BiEngineStatistics) -> Self {
        self.bi_engine = Some(statistics);
        self
    }

    /// Fail the job with the given error once it completes
    pub fn fail_with(mut self, error: BackendError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Answer an incomplete submission without a job reference
    pub fn omit_job_reference(mut self) -> Self {
        self.omit_job_reference = true;
        self
    }

    /// Answer status polls with a status but no statistics or reference
    pub fn malformed_snapshot(mut self) -> Self {
        self.malformed_snapshot = true;
        self
    }

    /// Serve the query without a job when the request allows it
    pub fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Block the submission call until a message arrives on `gate`
    pub fn hold_submission(mut self, gate: Receiver<()>) -> Self {
        self.submission_gate = Some(gate);
        self
    }
}

#[derive(Debug)]
struct JobRecord {
    reference: JobReference,
    script: ScriptedQuery,
    state: JobState,
    polls: u32,
    cancelled: bool,
    created_ms: i64,
    started_ms: Option<i64>,
    ended_ms: Option<i64>,
}

impl JobRecord {
    fn error_result(&self) -> Option<BackendError> {
        if self.cancelled {
            return Some(BackendError::new(REASON_STOPPED, "Job execution was cancelled: User requested cancellation"));
        }
        self.script.failure.clone()
    }

    fn finish(&mut self) {
        let now = Utc::now().timestamp_millis();
        self.state = JobState::Done;
        self.started_ms.get_or_insert(now);
        self.ended_ms = Some(now);
    }

    fn snapshot(&self) -> JobSnapshot {
        let done = self.state == JobState::Done;
        let mut status = JobStatus::new(self.state);
        if done {
            status.error_result = self.error_result();
        }
        JobSnapshot {
            job_reference: Some(self.reference.clone()),
            status: Some(status),
            statistics: Some(JobStatistics {
                creation_time: Some(self.created_ms),
                start_time: self.started_ms,
                end_time: self.ended_ms,
                total_bytes_processed: done.then_some(self.script.total_bytes_processed),
                cache_hit: if done { self.script.cache_hit } else { None },
                bi_engine: if done { self.script.bi_engine.clone() } else { None },
            }),
        }
    }
}

/// Scripted, thread-safe job service
#[derive(Debug)]
pub struct InMemoryJobService {
    project_id: String,
    scripts: Mutex<HashMap<String, ScriptedQuery>>,
    jobs: Mutex<HashMap<String, JobRecord>>,
    next_job: AtomicU64,
    cancel_failure: Mutex<Option<BackendError>>,
    last_request: Mutex<Option<QueryRequest>>,
    insert_calls: AtomicUsize,
    get_job_calls: AtomicUsize,
    results_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl InMemoryJobService {
    pub fn new(project_id: impl Into<String>) -> Self {
        InMemoryJobService {
            project_id: project_id.into(),
            scripts: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
            next_job: AtomicU64::new(1),
            cancel_failure: Mutex::new(None),
            last_request: Mutex::new(None),
            insert_calls: AtomicUsize::new(0),
            get_job_calls: AtomicUsize::new(0),
            results_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    /// Bind a SQL text to its scripted behavior
    pub fn script(&self, sql: &str, script: ScriptedQuery) {
        self.scripts.lock().insert(sql.trim().to_string(), script);
    }

    /// Make the next cancel call fail with `error`
    pub fn fail_next_cancel(&self, error: BackendError) {
        *self.cancel_failure.lock() = Some(error);
    }

    pub fn last_request(&self) -> Option<QueryRequest> {
        self.last_request.lock().clone()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn get_job_calls(&self) -> usize {
        self.get_job_calls.load(Ordering::SeqCst)
    }

    pub fn results_calls(&self) -> usize {
        self.results_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Current state of a job, if it exists
    pub fn job_state(&self, job_id: &str) -> Option<JobState> {
        self.jobs.lock().get(job_id).map(|job| job.state)
    }

    fn not_found(what: &str) -> TransportError {
        TransportError::Backend(BackendError::new(REASON_NOT_FOUND, format!("Not found: {}", what)))
    }

    fn billing_error(limit: i64, billed: i64) -> BackendError {
        BackendError::new(
            REASON_BILLING_LIMIT,
            format!("Query exceeded limit for bytes billed: {}. {} or higher required.", limit, billed),
        )
    }

    fn page(script: &ScriptedQuery, page_token: Option<&str>, max_results: Option<u32>) -> TransportResult<(Vec<Vec<Cell>>, Option<String>)> {
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| TransportError::Backend(BackendError::new("invalid", format!("Invalid page token: {}", token))))?,
            None => 0,
        };
        let size = max_results.unwrap_or(DEFAULT_FETCH_SIZE).max(1) as usize;
        let start = offset.min(script.rows.len());
        let end = (start + size).min(script.rows.len());
        let token = (end < script.rows.len()).then(|| end.to_string());
        Ok((script.rows[start..end].to_vec(), token))
    }
}

impl JobService for InMemoryJobService {
    fn insert_query(&self, _credential: &Credential, request: &QueryRequest) -> TransportResult<QueryResponse> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        let mut script = self
            .scripts
            .lock()
            .get(request.query.trim())
            .cloned()
            .ok_or_else(|| TransportError::Backend(BackendError::new("invalidQuery", format!("Unrecognized query: {}", request.query))))?;

        if let Some(gate) = &script.submission_gate {
            let _ = gate.recv();
        }

        if let Some(limit) = request.maximum_bytes_billed {
            if script.bytes_billed > limit {
                script.failure = Some(Self::billing_error(limit, script.bytes_billed));
            }
        }

        let seq = self.next_job.fetch_add(1, Ordering::SeqCst);

        if script.completion == Completion::Immediate {
            if let Some(failure) = script.failure.clone() {
                return Err(TransportError::Backend(failure));
            }
            let (rows, page_token) = Self::page(&script, None, request.max_results)?;
            let stateless = script.stateless
                && request.job_creation_mode == JobCreationMode::Optional
                && page_token.is_none();
            if stateless {
                return Ok(QueryResponse {
                    job_reference: None,
                    query_id: Some(format!("{}{}{}", self.project_id, STATELESS_QUERY_ID_DELIMITER, seq)),
                    job_complete: true,
                    schema: Some(script.schema.clone()),
                    total_rows: Some(script.rows.len() as u64),
                    rows,
                    page_token: None,
                    total_bytes_processed: Some(script.total_bytes_processed),
                    cache_hit: script.cache_hit,
                    errors: Vec::new(),
                });
            }
        }

        let reference = JobReference::new(self.project_id.clone(), format!("job_{:04}", seq), request.location.clone());
        let created_ms = Utc::now().timestamp_millis();
        let mut record = JobRecord {
            reference: reference.clone(),
            script: script.clone(),
            state: JobState::Pending,
            polls: 0,
            cancelled: false,
            created_ms,
            started_ms: None,
            ended_ms: None,
        };

        let response = if script.completion == Completion::Immediate {
            record.finish();
            let (rows, page_token) = Self::page(&script, None, request.max_results)?;
            QueryResponse {
                job_reference: Some(reference.clone()),
                query_id: None,
                job_complete: true,
                schema: Some(script.schema.clone()),
                rows,
                page_token,
                total_rows: Some(script.rows.len() as u64),
                total_bytes_processed: Some(script.total_bytes_processed),
                cache_hit: script.cache_hit,
                errors: Vec::new(),
            }
        } else {
            QueryResponse {
                job_reference: (!script.omit_job_reference).then(|| reference.clone()),
                job_complete: false,
                ..QueryResponse::default()
            }
        };

        self.jobs.lock().insert(reference.job_id.clone(), record);
        Ok(response)
    }

    fn get_job(&self, _credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot> {
        self.get_job_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock();
        let record = jobs.get_mut(&job.job_id).ok_or_else(|| Self::not_found(&job.job_id))?;

        if record.script.malformed_snapshot {
            return Ok(JobSnapshot {
                job_reference: None,
                status: Some(JobStatus::new(JobState::Running)),
                statistics: None,
            });
        }

        if record.state != JobState::Done {
            record.polls += 1;
            record.started_ms.get_or_insert_with(|| Utc::now().timestamp_millis());
            record.state = JobState::Running;
            if let Completion::AfterPolls(polls) = record.script.completion {
                if record.polls >= polls {
                    record.finish();
                }
            }
        }
        Ok(record.snapshot())
    }

    fn get_query_results(
        &self,
        _credential: &Credential,
        job: &JobReference,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> TransportResult<QueryResponse> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        let jobs = self.jobs.lock();
        let record = jobs.get(&job.job_id).ok_or_else(|| Self::not_found(&job.job_id))?;
        if record.state != JobState::Done {
            return Ok(QueryResponse {
                job_reference: Some(record.reference.clone()),
                job_complete: false,
                ..QueryResponse::default()
            });
        }
        if let Some(error) = record.error_result() {
            return Err(TransportError::Backend(error));
        }
        let (rows, page_token) = Self::page(&record.script, page_token, max_results)?;
        Ok(QueryResponse {
            job_reference: Some(record.reference.clone()),
            query_id: None,
            job_complete: true,
            schema: Some(record.script.schema.clone()),
            rows,
            page_token,
            total_rows: Some(record.script.rows.len() as u64),
            total_bytes_processed: Some(record.script.total_bytes_processed),
            cache_hit: record.script.cache_hit,
            errors: Vec::new(),
        })
    }

    fn cancel_job(&self, _credential: &Credential, job: &JobReference) -> TransportResult<JobSnapshot> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.cancel_failure.lock().take() {
            return Err(TransportError::Backend(error));
        }
        let mut jobs = self.jobs.lock();
        let record = jobs.get_mut(&job.job_id).ok_or_else(|| Self::not_found(&job.job_id))?;
        if record.state != JobState::Done {
            record.cancelled = true;
            record.finish();
        }
        Ok(record.snapshot())
    }
}
