use std::collections::VecDeque;
use std::sync::Arc;

use crate::driver::NativeCursor;
use crate::error::SqliteBridgeError;
use crate::types::Row;

/// Buffered statement result.
///
/// A rusqlite `Statement` borrows its connection, so rows are drained on the
/// handle's thread at execution time and served from memory afterwards.
#[derive(Debug, Default)]
pub struct SqliteCursor {
    columns: Option<Arc<Vec<String>>>,
    rows: VecDeque<Row>,
    row_count: i64,
    last_row_id: Option<i64>,
    closed: bool,
}

impl SqliteCursor {
    pub(crate) fn empty() -> Self {
        Self {
            row_count: -1,
            ..Self::default()
        }
    }

    pub(crate) fn with_rows(columns: Arc<Vec<String>>, rows: VecDeque<Row>) -> Self {
        Self {
            columns: Some(columns),
            rows,
            row_count: -1,
            ..Self::default()
        }
    }

    pub(crate) fn with_changes(row_count: i64, last_row_id: i64) -> Self {
        Self {
            row_count,
            last_row_id: Some(last_row_id),
            ..Self::default()
        }
    }

    fn ensure_open(&self) -> Result<(), SqliteBridgeError> {
        if self.closed {
            Err(SqliteBridgeError::ExecutionError(
                "cannot operate on a closed cursor".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl NativeCursor for SqliteCursor {
    fn fetch_one(&mut self) -> Result<Option<Row>, SqliteBridgeError> {
        self.ensure_open()?;
        Ok(self.rows.pop_front())
    }

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>, SqliteBridgeError> {
        self.ensure_open()?;
        let take = size.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, SqliteBridgeError> {
        self.ensure_open()?;
        Ok(self.rows.drain(..).collect())
    }

    fn row_count(&self) -> i64 {
        self.row_count
    }

    fn last_row_id(&self) -> Option<i64> {
        self.last_row_id
    }

    fn description(&self) -> Option<Arc<Vec<String>>> {
        self.columns.clone()
    }

    fn close(&mut self) -> Result<(), SqliteBridgeError> {
        self.rows.clear();
        self.closed = true;
        Ok(())
    }
}
