// Query Executor
//
// Runs one query against the job service: a synchronous attempt within a
// fixed window, then status polling on a backoff schedule until the job is
// done, failed, or cancelled. Cancellation may arrive from any thread at any
// point of that lifecycle.

use std::sync::Arc;
use crossbeam::channel::{self, after, select, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::backend::{BackendError, Credential, JobReference, JobService, JobSnapshot, JobState, QueryResponse};
use crate::common::types::{ExecutorId, SharedJobHandle, SYNC_TIMEOUT_MS};
use crate::config::PollSchedule;
use crate::query::error::{QueryError, QueryResult};
use crate::query::job::JobHandle;
use crate::query::page::{ResultPage, ResultPager};
use crate::query::request::Query;
use crate::session::registry::{RegistryEntry, SessionRegistry};
use crate::types::Field;

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    SyncPending,
    SyncDone,
    AsyncPolling,
    Done,
    Cancelled,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Done | ExecutionPhase::Cancelled | ExecutionPhase::Failed)
    }

    /// Submitted and not yet known to be complete
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ExecutionPhase::SyncPending | ExecutionPhase::AsyncPolling)
    }
}

/// What a cancel request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Cancel RPC acknowledged by the backend
    Delivered,
    /// No job reference yet; issued as soon as one arrives
    Latched,
    /// Nothing to cancel (not started, already complete, or already requested)
    NotNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CancelState {
    NotRequested,
    Latched,
    InFlight,
    Delivered(String),
}

#[derive(Debug)]
struct ControlState {
    phase: ExecutionPhase,
    cancel: CancelState,
    job: Option<JobReference>,
    closed: bool,
}

/// State shared between the executing thread, cancelling threads and the registry
pub struct ExecutorCore {
    id: ExecutorId,
    service: Arc<dyn JobService>,
    credential: Credential,
    schedule: PollSchedule,
    control: Mutex<ControlState>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    job: SharedJobHandle,
}

impl std::fmt::Debug for ExecutorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorCore")
            .field("id", &self.id)
            .field("control", &*self.control.lock())
            .finish()
    }
}

impl ExecutorCore {
    pub fn id(&self) -> ExecutorId {
        self.id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.control.lock().phase
    }

    /// Submitted and not yet terminal
    pub fn is_running(&self) -> bool {
        let phase = self.phase();
        phase != ExecutionPhase::Idle && !phase.is_terminal()
    }

    pub fn job_reference(&self) -> Option<JobReference> {
        self.control.lock().job.clone()
    }

    pub fn cancel_requested(&self) -> bool {
        self.control.lock().cancel != CancelState::NotRequested
    }

    fn set_phase(&self, phase: ExecutionPhase) {
        self.control.lock().phase = phase;
    }

    fn delivered_cancel(&self) -> Option<String> {
        match &self.control.lock().cancel {
            CancelState::Delivered(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Request cancellation from any thread
    pub fn request_cancel(&self) -> QueryResult<CancelOutcome> {
        let (job, restore) = {
            let mut control = self.control.lock();
            if control.phase.is_terminal() || control.phase == ExecutionPhase::SyncDone {
                debug!("[CANCEL] Executor {} already {:?}, nothing to cancel", self.id, control.phase);
                return Ok(CancelOutcome::NotNeeded);
            }
            let restore = match control.cancel {
                CancelState::NotRequested => CancelState::NotRequested,
                // Latched and the job is known: a failed earlier delivery awaiting retry
                CancelState::Latched if control.job.is_some() => CancelState::Latched,
                _ => return Ok(CancelOutcome::NotNeeded),
            };
            match control.job.clone() {
                Some(job) => {
                    control.cancel = CancelState::InFlight;
                    (job, restore)
                }
                None => {
                    control.cancel = CancelState::Latched;
                    info!("[CANCEL] Executor {} has no job yet, cancellation latched", self.id);
                    return Ok(CancelOutcome::Latched);
                }
            }
        };
        self.deliver_cancel(&job, restore).map(|_| CancelOutcome::Delivered)
    }

    /// Claim a latched cancel once the job reference is known
    fn claim_latched_cancel(&self) -> bool {
        let mut control = self.control.lock();
        if control.cancel == CancelState::Latched && control.job.is_some() {
            control.cancel = CancelState::InFlight;
            true
        } else {
            false
        }
    }

    /// Move out of the in-flight phases once the job is DONE; cancelling is
    /// a no-op from here on
    fn mark_done(&self) {
        self.control.lock().phase = ExecutionPhase::Done;
    }

    /// Issue the cancel RPC. On failure the cancel state reverts to `restore`.
    fn deliver_cancel(&self, job: &JobReference, restore: CancelState) -> QueryResult<()> {
        info!("[CANCEL] Cancelling job {} (executor {})", job, self.id);
        match self.service.cancel_job(&self.credential, job) {
            Ok(ack) => {
                let reason = ack
                    .status
                    .and_then(|status| status.error_result)
                    .map(|err| err.message)
                    .unwrap_or_else(|| "Job cancellation requested".to_string());
                self.control.lock().cancel = CancelState::Delivered(reason);
                self.wake();
                Ok(())
            }
            Err(e) => {
                warn!("[CANCEL] Failed to cancel job {}: {}", job, e);
                self.control.lock().cancel = restore;
                Err(QueryError::poll(format!("Failed to cancel job {}", job), &e))
            }
        }
    }

    fn run(&self, query: &Query) -> QueryResult<(Vec<Field>, ResultPage, Option<JobReference>)> {
        let request = query.to_request();
        info!(
            "[EXECUTOR] Executor {} submitting query ({} chars, {:?}, labels {:?})",
            self.id,
            query.sql().len(),
            query.dialect(),
            query.labels()
        );

        let response = self
            .service
            .insert_query(&self.credential, &request)
            .map_err(|e| match e.backend_error() {
                Some(err) if err.is_billing_limit() => billing_error(query, err),
                _ => QueryError::submission("Failed to submit query", &e),
            })?;

        if response.job_complete {
            return self.complete_sync(response);
        }

        let job = response.job_reference.clone().ok_or(QueryError::MissingJobReference)?;
        self.job.write().set_reference(job.clone());

        {
            let mut control = self.control.lock();
            control.job = Some(job.clone());
            control.phase = ExecutionPhase::AsyncPolling;
        }
        info!(
            "[EXECUTOR] Job {} not complete within {} ms, polling",
            job, SYNC_TIMEOUT_MS
        );

        self.poll_until_done(&job, query)?;

        let response = self
            .service
            .get_query_results(&self.credential, &job, None, query.page_size())
            .map_err(|e| QueryError::poll(format!("Failed to fetch results of job {}", job), &e))?;
        if !response.job_complete {
            return Err(QueryError::MalformedResponse(format!("job {} is done but its results are not", job)));
        }
        self.job.write().apply_response(&response);
        let schema = response.schema.clone().unwrap_or_default();
        Ok((schema, ResultPage::from_response(&response), Some(job)))
    }

    fn complete_sync(&self, response: QueryResponse) -> QueryResult<(Vec<Field>, ResultPage, Option<JobReference>)> {
        let job = response.job_reference.clone();
        if job.is_none() {
            if response.page_token.is_some() {
                return Err(QueryError::MalformedResponse(
                    "stateless response carries a page token".to_string(),
                ));
            }
            if response.query_id.is_none() {
                return Err(QueryError::MalformedResponse(
                    "complete response has neither a job reference nor a query id".to_string(),
                ));
            }
        }

        {
            let mut control = self.control.lock();
            control.phase = ExecutionPhase::SyncDone;
            control.job = job.clone();
            if control.cancel == CancelState::Latched {
                debug!("[CANCEL] Executor {} completed synchronously, dropping latched cancel", self.id);
                control.cancel = CancelState::NotRequested;
            }
        }

        self.job.write().apply_response(&response);
        match &job {
            Some(job) => info!("[EXECUTOR] Job {} completed within the synchronous window", job),
            None => info!(
                "[EXECUTOR] Query {} answered without a job",
                response.query_id.as_deref().unwrap_or_default()
            ),
        }
        let schema = response.schema.clone().unwrap_or_default();
        Ok((schema, ResultPage::from_response(&response), job))
    }

    fn poll_until_done(&self, job: &JobReference, query: &Query) -> QueryResult<()> {
        let mut attempt: u32 = 0;
        loop {
            if let Some(reason) = self.delivered_cancel() {
                return Err(QueryError::Cancelled { job_id: Some(job.job_id.clone()), reason });
            }
            // A cancel latched before submission returned; stays latched if delivery fails
            if self.claim_latched_cancel() && self.deliver_cancel(job, CancelState::Latched).is_ok() {
                continue;
            }

            match self.service.get_job(&self.credential, job) {
                Ok(snapshot) => {
                    self.job.write().apply_snapshot(&snapshot)?;
                    debug!("[POLL] Job {} attempt {}: {}", job, attempt + 1, self.job.read().state());
                    if let Some(result) = finished(job, &snapshot, query) {
                        if result.is_ok() {
                            self.mark_done();
                        }
                        return result;
                    }
                }
                Err(e) if e.is_not_found() => {
                    debug!("[POLL] Job {} not visible yet (attempt {})", job, attempt + 1);
                }
                Err(e) => return Err(QueryError::poll(format!("Failed to poll job {}", job), &e)),
            }

            let delay = self.schedule.delay(attempt);
            attempt = attempt.saturating_add(1);
            select! {
                recv(self.wake_rx) -> _ => debug!("[POLL] Job {} woken early", job),
                recv(after(delay)) -> _ => {}
            }
        }
    }
}

fn billing_error(query: &Query, err: &BackendError) -> QueryError {
    QueryError::BillingLimitExceeded {
        limit: query.billing_limit(),
        message: err.message.clone(),
    }
}

/// Outcome of a DONE snapshot; `None` while the job is still running
fn finished(job: &JobReference, snapshot: &JobSnapshot, query: &Query) -> Option<QueryResult<()>> {
    let status = snapshot.status.as_ref()?;
    if status.state != JobState::Done {
        return None;
    }
    let Some(err) = &status.error_result else {
        return Some(Ok(()));
    };
    warn!("[EXECUTOR] Job {} finished with error: {}", job, err);
    Some(Err(if err.is_billing_limit() {
        billing_error(query, err)
    } else if err.is_stopped() {
        QueryError::Cancelled {
            job_id: Some(job.job_id.clone()),
            reason: err.message.clone(),
        }
    } else {
        QueryError::QueryFailed(err.message.clone())
    }))
}

/// Finished execution handed to a cursor
#[derive(Debug)]
pub struct ExecutionResult {
    pub job: SharedJobHandle,
    pub schema: Vec<Field>,
    pub first_page: ResultPage,
    pub pager: ResultPager,
    pub entry: Option<RegistryEntry>,
}

/// Executes exactly one query
#[derive(Debug)]
pub struct QueryExecutor {
    core: Arc<ExecutorCore>,
    registry: Arc<SessionRegistry>,
    entry: Mutex<Option<RegistryEntry>>,
}

impl QueryExecutor {
    pub fn new(
        service: Arc<dyn JobService>,
        credential: Credential,
        registry: Arc<SessionRegistry>,
        schedule: PollSchedule,
    ) -> Self {
        let (wake_tx, wake_rx) = channel::bounded(1);
        let core = ExecutorCore {
            id: registry.allocate_id(),
            service,
            credential,
            schedule,
            control: Mutex::new(ControlState {
                phase: ExecutionPhase::Idle,
                cancel: CancelState::NotRequested,
                job: None,
                closed: false,
            }),
            wake_tx,
            wake_rx,
            job: Arc::new(RwLock::new(JobHandle::default())),
        };
        QueryExecutor {
            core: Arc::new(core),
            registry,
            entry: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ExecutorId {
        self.core.id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.core.phase()
    }

    /// Shared view of the job this executor runs
    pub fn job(&self) -> SharedJobHandle {
        Arc::clone(&self.core.job)
    }

    /// Run the query to completion, blocking the calling thread
    pub fn execute(&self, query: &Query) -> QueryResult<ExecutionResult> {
        {
            let mut control = self.core.control.lock();
            if control.closed {
                return Err(QueryError::Closed);
            }
            if control.phase != ExecutionPhase::Idle {
                return Err(QueryError::InvalidState(format!(
                    "executor {} already ran a query ({:?})",
                    self.core.id, control.phase
                )));
            }
            control.phase = ExecutionPhase::SyncPending;
        }
        self.core
            .job
            .write()
            .set_submission(query.labels().clone(), query.location().map(str::to_string));

        let entry = self.registry.register(&self.core);
        *self.entry.lock() = Some(entry.clone());

        match self.core.run(query) {
            Ok((schema, first_page, job)) => {
                self.core.set_phase(ExecutionPhase::Done);
                Ok(ExecutionResult {
                    job: self.job(),
                    schema,
                    first_page,
                    pager: ResultPager::new(Arc::clone(&self.core.service), self.core.credential.clone(), job),
                    entry: Some(entry),
                })
            }
            Err(e) => {
                let phase = if e.is_cancelled() { ExecutionPhase::Cancelled } else { ExecutionPhase::Failed };
                self.core.set_phase(phase);
                warn!("[EXECUTOR] Executor {} {:?}: {}", self.core.id, phase, e);
                if let Some(entry) = self.entry.lock().take() {
                    entry.release();
                }
                Err(e)
            }
        }
    }

    /// Cancel the query; safe to call from any thread and more than once
    pub fn cancel(&self) -> QueryResult<()> {
        self.core.request_cancel().map(|_| ())
    }

    /// Release the registry entry and cancel the job if it is still in flight
    pub fn close(&self) {
        let in_flight = {
            let mut control = self.core.control.lock();
            control.closed = true;
            control.phase.is_in_flight()
        };
        if in_flight {
            if let Err(e) = self.core.request_cancel() {
                warn!("[EXECUTOR] Executor {} closed with a failed cancel: {}", self.core.id, e);
            }
        }
        if let Some(entry) = self.entry.lock().take() {
            entry.release();
        }
    }
}
