// Streaming Cursor
//
// Forward-only cursor holding a single result page at a time. Follow-up
// pages are fetched lazily when the current one is exhausted.

use log::debug;

use crate::cursor::error::{CursorError, CursorResult};
use crate::cursor::{CursorCore, CursorOptions, CursorPosition, RowCursor};
use crate::query::executor::ExecutionResult;
use crate::query::page::ResultPager;
use crate::types::Cell;

pub struct StreamingCursor {
    core: CursorCore,
    pager: ResultPager,
    page: Vec<Vec<Cell>>,
    /// Index in `page` of the current row
    current: Option<usize>,
    /// Index in `page` of the next row to return
    next_index: usize,
    page_token: Option<String>,
    /// Rows requested per fetch; `None` leaves the page size to the backend
    fetch_size: Option<u32>,
    max_rows: Option<u64>,
    rows_read: u64,
    position: CursorPosition,
}

impl StreamingCursor {
    pub fn new(result: ExecutionResult, options: CursorOptions) -> Self {
        let ExecutionResult { job, schema, first_page, pager, entry } = result;
        let (page, page_token) = first_page.into_parts();
        StreamingCursor {
            core: CursorCore::new(&schema, options.coercion, job, entry),
            pager,
            page,
            current: None,
            next_index: 0,
            page_token,
            fetch_size: options.fetch_size,
            max_rows: options.max_rows,
            rows_read: 0,
            position: CursorPosition::BeforeFirst,
        }
    }

    fn check_open(&self) -> CursorResult<()> {
        if self.position == CursorPosition::Closed {
            Err(CursorError::Closed)
        } else {
            Ok(())
        }
    }

    fn forward_only(&self, op: &'static str) -> CursorError {
        if self.position == CursorPosition::Closed {
            CursorError::Closed
        } else {
            CursorError::ForwardOnly(op)
        }
    }

    fn fetch_next_page(&mut self, token: &str) -> CursorResult<()> {
        let page = self.pager.fetch(token, self.fetch_size)?;
        debug!("[CURSOR] Fetched {} rows (more: {})", page.len(), page.has_more());
        let (rows, next_token) = page.into_parts();
        self.page = rows;
        self.current = None;
        self.next_index = 0;
        self.page_token = next_token;
        Ok(())
    }

    fn finish(&mut self) -> bool {
        self.current = None;
        self.position = CursorPosition::AfterLast;
        false
    }
}

impl RowCursor for StreamingCursor {
    fn next(&mut self) -> CursorResult<bool> {
        self.check_open()?;
        if self.position == CursorPosition::AfterLast {
            return Ok(false);
        }
        if self.max_rows.is_some_and(|max| self.rows_read >= max) {
            return Ok(self.finish());
        }
        loop {
            if self.next_index < self.page.len() {
                self.current = Some(self.next_index);
                self.next_index += 1;
                self.rows_read += 1;
                self.position = CursorPosition::OnRow(self.rows_read);
                return Ok(true);
            }
            match self.page_token.clone() {
                // Empty pages that still carry a token are skipped
                Some(token) => self.fetch_next_page(&token)?,
                None => return Ok(self.finish()),
            }
        }
    }

    fn previous(&mut self) -> CursorResult<bool> {
        Err(self.forward_only("previous"))
    }

    fn first(&mut self) -> CursorResult<bool> {
        Err(self.forward_only("first"))
    }

    fn last(&mut self) -> CursorResult<bool> {
        Err(self.forward_only("last"))
    }

    fn before_first(&mut self) -> CursorResult<()> {
        Err(self.forward_only("before_first"))
    }

    fn after_last(&mut self) -> CursorResult<()> {
        Err(self.forward_only("after_last"))
    }

    fn absolute(&mut self, _row: i64) -> CursorResult<bool> {
        Err(self.forward_only("absolute"))
    }

    fn relative(&mut self, _delta: i64) -> CursorResult<bool> {
        Err(self.forward_only("relative"))
    }

    fn position(&self) -> CursorPosition {
        self.position
    }

    fn row(&self) -> CursorResult<&[Cell]> {
        self.check_open()?;
        match (self.position, self.current) {
            (CursorPosition::OnRow(_), Some(index)) => Ok(&self.page[index]),
            (position, _) => Err(CursorError::NotOnRow(position)),
        }
    }

    fn set_fetch_size(&mut self, size: u32) -> CursorResult<()> {
        self.check_open()?;
        if size == 0 {
            return Err(CursorError::InvalidArgument("fetch size must be positive".to_string()));
        }
        // Rows already fetched are not re-paged
        self.fetch_size = Some(size);
        Ok(())
    }

    fn is_forward_only(&self) -> bool {
        true
    }

    fn close(&mut self) {
        if self.position == CursorPosition::Closed {
            return;
        }
        debug!("[CURSOR] Closing streaming cursor after {} rows", self.rows_read);
        self.page.clear();
        self.current = None;
        self.page_token = None;
        self.position = CursorPosition::Closed;
        self.core.release();
    }

    fn core(&self) -> &CursorCore {
        &self.core
    }
}
