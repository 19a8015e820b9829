// Materialized Cursor
//
// Scrollable cursor. Every page is drained at construction, subject to the
// row limit, so positioning never touches the backend.

use log::debug;

use crate::cursor::error::{CursorError, CursorResult};
use crate::cursor::{CursorCore, CursorOptions, CursorPosition, RowCursor};
use crate::query::executor::ExecutionResult;
use crate::query::QueryResult;
use crate::types::Cell;

pub struct MaterializedCursor {
    core: CursorCore,
    rows: Vec<Vec<Cell>>,
    position: CursorPosition,
}

impl MaterializedCursor {
    pub fn new(result: ExecutionResult, options: CursorOptions) -> QueryResult<Self> {
        let ExecutionResult { job, schema, first_page, pager, entry } = result;
        let limit = options.max_rows.map(|max| max as usize);
        let (mut rows, mut token) = first_page.into_parts();
        let mut pages = 1;

        while let Some(page_token) = token {
            if limit.is_some_and(|max| rows.len() >= max) {
                break;
            }
            let page = pager.fetch(&page_token, options.fetch_size)?;
            let (page_rows, next_token) = page.into_parts();
            rows.extend(page_rows);
            token = next_token;
            pages += 1;
        }
        if let Some(max) = limit {
            rows.truncate(max);
        }
        debug!("[CURSOR] Materialized {} rows from {} pages", rows.len(), pages);

        Ok(MaterializedCursor {
            core: CursorCore::new(&schema, options.coercion, job, entry),
            rows,
            position: CursorPosition::BeforeFirst,
        })
    }

    /// Number of rows held
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn check_open(&self) -> CursorResult<()> {
        if self.position == CursorPosition::Closed {
            Err(CursorError::Closed)
        } else {
            Ok(())
        }
    }

    /// Position as an index in `0..=len + 1` (0 is before first, len + 1 after last)
    fn index(&self) -> i64 {
        match self.position {
            CursorPosition::OnRow(n) => n as i64,
            CursorPosition::AfterLast => self.rows.len() as i64 + 1,
            CursorPosition::BeforeFirst | CursorPosition::Closed => 0,
        }
    }

    /// Move to `target`, clamping to a boundary when out of range
    fn move_to(&mut self, target: i64) -> bool {
        let len = self.rows.len() as i64;
        if target < 1 {
            self.position = CursorPosition::BeforeFirst;
            false
        } else if target > len {
            self.position = CursorPosition::AfterLast;
            false
        } else {
            self.position = CursorPosition::OnRow(target as u64);
            true
        }
    }
}

impl RowCursor for MaterializedCursor {
    fn next(&mut self) -> CursorResult<bool> {
        self.check_open()?;
        let target = self.index().saturating_add(1);
        Ok(self.move_to(target))
    }

    fn previous(&mut self) -> CursorResult<bool> {
        self.check_open()?;
        let target = self.index().saturating_sub(1);
        Ok(self.move_to(target))
    }

    fn first(&mut self) -> CursorResult<bool> {
        self.check_open()?;
        Ok(self.move_to(1))
    }

    fn last(&mut self) -> CursorResult<bool> {
        self.check_open()?;
        if self.rows.is_empty() {
            self.position = CursorPosition::BeforeFirst;
            return Ok(false);
        }
        Ok(self.move_to(self.rows.len() as i64))
    }

    fn before_first(&mut self) -> CursorResult<()> {
        self.check_open()?;
        self.position = CursorPosition::BeforeFirst;
        Ok(())
    }

    fn after_last(&mut self) -> CursorResult<()> {
        self.check_open()?;
        self.position = CursorPosition::AfterLast;
        Ok(())
    }

    fn absolute(&mut self, row: i64) -> CursorResult<bool> {
        self.check_open()?;
        let target = if row < 0 {
            (self.rows.len() as i64).saturating_add(row).saturating_add(1)
        } else {
            row
        };
        Ok(self.move_to(target))
    }

    fn relative(&mut self, delta: i64) -> CursorResult<bool> {
        self.check_open()?;
        let target = self.index().saturating_add(delta);
        Ok(self.move_to(target))
    }

    fn position(&self) -> CursorPosition {
        self.position
    }

    fn row(&self) -> CursorResult<&[Cell]> {
        match self.position {
            CursorPosition::OnRow(n) => Ok(&self.rows[(n - 1) as usize]),
            CursorPosition::Closed => Err(CursorError::Closed),
            position => Err(CursorError::NotOnRow(position)),
        }
    }

    fn set_fetch_size(&mut self, size: u32) -> CursorResult<()> {
        self.check_open()?;
        if size == 0 {
            return Err(CursorError::InvalidArgument("fetch size must be positive".to_string()));
        }
        // Rows are already in memory
        Ok(())
    }

    fn is_forward_only(&self) -> bool {
        false
    }

    fn close(&mut self) {
        if self.position == CursorPosition::Closed {
            return;
        }
        debug!("[CURSOR] Closing materialized cursor over {} rows", self.rows.len());
        self.rows.clear();
        self.position = CursorPosition::Closed;
        self.core.release();
    }

    fn core(&self) -> &CursorCore {
        &self.core
    }
}
