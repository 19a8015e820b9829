// Result Pages
//
// Immutable batches of rows and the pager that pulls follow-up batches of a
// finished job.

use std::sync::Arc;
use log::debug;

use crate::backend::{Credential, JobReference, JobService, QueryResponse};
use crate::query::error::{QueryError, QueryResult};
use crate::types::Cell;

/// One batch of rows plus the token for the next batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    rows: Vec<Vec<Cell>>,
    page_token: Option<String>,
    total_rows: Option<u64>,
}

impl ResultPage {
    pub fn new(rows: Vec<Vec<Cell>>, page_token: Option<String>, total_rows: Option<u64>) -> Self {
        ResultPage { rows, page_token, total_rows }
    }

    pub fn from_response(response: &QueryResponse) -> Self {
        ResultPage {
            rows: response.rows.clone(),
            page_token: response.page_token.clone(),
            total_rows: response.total_rows,
        }
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn into_parts(self) -> (Vec<Vec<Cell>>, Option<String>) {
        (self.rows, self.page_token)
    }

    /// Continuation token; `None` on the last page
    pub fn page_token(&self) -> Option<&str> {
        self.page_token.as_deref()
    }

    pub fn has_more(&self) -> bool {
        self.page_token.is_some()
    }

    /// Backend estimate of the total result size
    pub fn total_rows(&self) -> Option<u64> {
        self.total_rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fetches follow-up pages of one job's results
#[derive(Clone)]
pub struct ResultPager {
    service: Arc<dyn JobService>,
    credential: Credential,
    job: Option<JobReference>,
}

impl ResultPager {
    pub fn new(service: Arc<dyn JobService>, credential: Credential, job: Option<JobReference>) -> Self {
        ResultPager { service, credential, job }
    }

    pub fn job(&self) -> Option<&JobReference> {
        self.job.as_ref()
    }

    /// Fetch the page identified by `page_token`
    pub fn fetch(&self, page_token: &str, max_results: Option<u32>) -> QueryResult<ResultPage> {
        let job = self
            .job
            .as_ref()
            .ok_or_else(|| QueryError::MalformedResponse("page token without a job to page through".to_string()))?;

        debug!("[CURSOR] Fetching page {} of job {} (max {:?})", page_token, job, max_results);
        let response = self
            .service
            .get_query_results(&self.credential, job, Some(page_token), max_results)
            .map_err(|e| QueryError::poll("Failed to fetch results page", &e))?;
        if !response.job_complete {
            return Err(QueryError::MalformedResponse(format!("job {} returned an incomplete results page", job)));
        }
        Ok(ResultPage::from_response(&response))
    }
}

impl std::fmt::Debug for ResultPager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPager").field("job", &self.job).finish()
    }
}
