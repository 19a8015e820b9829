// Job Handle
//
// Identity and last-known status of one backend job. The executor is the
// only writer; cursors read it through the shared handle.

use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::backend::{BiEngineReason, BiEngineStatistics, JobReference, JobSnapshot, JobState, QueryResponse};
use crate::common::types::STATELESS_QUERY_ID_DELIMITER;
use crate::config::Labels;
use crate::query::error::{QueryError, QueryResult};
use crate::types::Field;

#[derive(Debug, Clone)]
pub struct JobHandle {
    reference: Option<JobReference>,
    query_id: Option<String>,
    state: JobState,
    creation_time: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    total_bytes_processed: Option<i64>,
    cache_hit: Option<bool>,
    bi_engine: Option<BiEngineStatistics>,
    schema: Vec<Field>,
    total_rows: Option<u64>,
    labels: Labels,
    location: Option<String>,
}

impl Default for JobHandle {
    fn default() -> Self {
        JobHandle::new(Labels::new(), None)
    }
}

fn millis_to_time(field: &str, millis: i64) -> QueryResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| QueryError::MalformedJob(format!("{} {} is out of range", field, millis)))
}

impl JobHandle {
    /// Create a handle for a query that has not been submitted yet
    pub fn new(labels: Labels, location: Option<String>) -> Self {
        JobHandle {
            reference: None,
            query_id: None,
            state: JobState::Pending,
            creation_time: None,
            start_time: None,
            end_time: None,
            total_bytes_processed: None,
            cache_hit: None,
            bi_engine: None,
            schema: Vec::new(),
            total_rows: None,
            labels,
            location,
        }
    }

    pub(crate) fn set_submission(&mut self, labels: Labels, location: Option<String>) {
        self.labels = labels;
        self.location = location;
    }

    pub(crate) fn set_reference(&mut self, reference: JobReference) {
        if self.location.is_none() {
            self.location = reference.location.clone();
        }
        self.reference = Some(reference);
    }

    /// Apply a polled snapshot, rejecting incomplete ones
    pub(crate) fn apply_snapshot(&mut self, snapshot: &JobSnapshot) -> QueryResult<()> {
        let status = snapshot
            .status
            .as_ref()
            .ok_or_else(|| QueryError::MalformedJob("snapshot has no status".to_string()))?;
        let statistics = snapshot
            .statistics
            .as_ref()
            .ok_or_else(|| QueryError::MalformedJob("snapshot has no statistics".to_string()))?;
        let reference = snapshot
            .job_reference
            .as_ref()
            .ok_or_else(|| QueryError::MalformedJob("snapshot has no job reference".to_string()))?;

        let creation_ms = statistics
            .creation_time
            .ok_or_else(|| QueryError::MalformedJob(format!("job {} has no creation time", reference.job_id)))?;
        if status.state != JobState::Pending && statistics.start_time.is_none() {
            return Err(QueryError::MalformedJob(format!(
                "job {} is {} but has no start time",
                reference.job_id, status.state
            )));
        }

        let was_done = self.state == JobState::Done;
        self.set_reference(reference.clone());
        self.state = status.state;
        self.creation_time = Some(millis_to_time("creation time", creation_ms)?);
        self.start_time = statistics.start_time.map(|ms| millis_to_time("start time", ms)).transpose()?;
        self.end_time = statistics.end_time.map(|ms| millis_to_time("end time", ms)).transpose()?;
        if statistics.total_bytes_processed.is_some() {
            self.total_bytes_processed = statistics.total_bytes_processed;
        }
        if statistics.cache_hit.is_some() {
            self.cache_hit = statistics.cache_hit;
        }
        if statistics.bi_engine.is_some() {
            self.bi_engine = statistics.bi_engine.clone();
        }

        if !was_done && self.state == JobState::Done {
            info!(
                "[EXECUTOR] Job {} done: pending {} ms, running {} ms",
                reference,
                self.pending_duration().map_or(-1, |d| d.num_milliseconds()),
                self.running_duration().map_or(-1, |d| d.num_milliseconds()),
            );
        }
        Ok(())
    }

    /// Apply a completed query response: schema, totals and result identity
    pub(crate) fn apply_response(&mut self, response: &QueryResponse) {
        if let Some(reference) = &response.job_reference {
            self.set_reference(reference.clone());
        }
        if response.query_id.is_some() {
            self.query_id = response.query_id.clone();
        }
        if let Some(schema) = &response.schema {
            self.schema = schema.clone();
        }
        if response.total_rows.is_some() {
            self.total_rows = response.total_rows;
        }
        if response.total_bytes_processed.is_some() {
            self.total_bytes_processed = response.total_bytes_processed;
        }
        if response.cache_hit.is_some() {
            self.cache_hit = response.cache_hit;
        }
        if response.job_complete {
            self.state = JobState::Done;
        }
    }

    pub fn reference(&self) -> Option<&JobReference> {
        self.reference.as_ref()
    }

    /// Backend job id; `None` for stateless results
    pub fn job_id(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.job_id.as_str())
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    /// Answered without a job
    pub fn is_stateless(&self) -> bool {
        self.reference.is_none() && self.query_id.as_deref().is_some_and(|id| id.contains(STATELESS_QUERY_ID_DELIMITER))
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Time spent queued before execution started
    pub fn pending_duration(&self) -> Option<Duration> {
        Some(self.start_time? - self.creation_time?)
    }

    pub fn running_duration(&self) -> Option<Duration> {
        Some(self.end_time? - self.start_time?)
    }

    pub fn total_bytes_processed(&self) -> Option<i64> {
        self.total_bytes_processed
    }

    /// Explicit backend flag, otherwise whether no bytes were processed
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
            .or_else(|| self.total_bytes_processed.map(|bytes| bytes == 0))
            .unwrap_or(false)
    }

    pub fn bi_engine_mode(&self) -> Option<&str> {
        self.bi_engine.as_ref().map(|bi| bi.mode.as_str())
    }

    pub fn bi_engine_reasons(&self) -> &[BiEngineReason] {
        self.bi_engine.as_ref().map(|bi| bi.reasons.as_slice()).unwrap_or_default()
    }

    pub fn schema(&self) -> &[Field] {
        &self.schema
    }

    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    /// Labels sent with the submission
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}
