use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::Stream;
use futures_util::stream;

use crate::driver::{Driver, DriverHandle, NativeCursor};
use crate::error::SqliteBridgeError;
use crate::sqlite::SqliteDriver;
use crate::types::{Row, RowValues};

use super::Connection;

type NativeOf<D> = <<D as Driver>::Handle as DriverHandle>::Cursor;

/// Async view over a native cursor.
///
/// Fetches go through the owning connection's bridge, so in single-writer
/// mode they run on the worker thread like every other handle call.
pub struct Cursor<D: Driver = SqliteDriver> {
    conn: Connection<D>,
    native: Arc<Mutex<NativeOf<D>>>,
    row_count: i64,
    last_row_id: Option<i64>,
    description: Option<Arc<Vec<String>>>,
    array_size: usize,
    closed: bool,
}

impl<D: Driver> fmt::Debug for Cursor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("connection", &self.conn.id())
            .field("row_count", &self.row_count)
            .field("last_row_id", &self.last_row_id)
            .field("array_size", &self.array_size)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Result metadata, read on the handle's thread right after execution.
pub(crate) struct CursorMeta {
    row_count: i64,
    last_row_id: Option<i64>,
    description: Option<Arc<Vec<String>>>,
}

impl CursorMeta {
    pub(crate) fn read<C: NativeCursor>(native: &C) -> Self {
        Self {
            row_count: native.row_count(),
            last_row_id: native.last_row_id(),
            description: native.description(),
        }
    }
}

impl<D: Driver> Cursor<D> {
    pub(crate) fn from_native(
        conn: Connection<D>,
        (native, meta): (NativeOf<D>, CursorMeta),
    ) -> Self {
        Self {
            conn,
            native: Arc::new(Mutex::new(native)),
            row_count: meta.row_count,
            last_row_id: meta.last_row_id,
            description: meta.description,
            array_size: 1,
            closed: false,
        }
    }

    fn ensure_usable(&self) -> Result<(), SqliteBridgeError> {
        if self.conn.closed() {
            return Err(SqliteBridgeError::ConnectionClosed);
        }
        if self.closed {
            return Err(SqliteBridgeError::ExecutionError(
                "cannot operate on a closed cursor".into(),
            ));
        }
        Ok(())
    }

    async fn with_native<R, F>(&self, func: F) -> Result<R, SqliteBridgeError>
    where
        F: FnOnce(&mut NativeOf<D>) -> Result<R, SqliteBridgeError> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_usable()?;
        let native = Arc::clone(&self.native);
        self.conn
            .run(move |_handle| {
                let mut guard = native.lock().unwrap_or_else(PoisonError::into_inner);
                func(&mut guard)
            })
            .await
    }

    /// Run a new statement on this cursor, discarding any unread rows.
    ///
    /// # Errors
    /// `ConnectionClosed`, a closed-cursor `ExecutionError`, or the driver's error.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<&mut Self, SqliteBridgeError> {
        self.ensure_usable()?;
        let next = self.conn.execute(sql, params).await?;
        self.adopt(next);
        Ok(self)
    }

    /// # Errors
    /// `ConnectionClosed`, a closed-cursor `ExecutionError`, or the driver's error.
    pub async fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<&mut Self, SqliteBridgeError> {
        self.ensure_usable()?;
        let next = self.conn.execute_many(sql, param_sets).await?;
        self.adopt(next);
        Ok(self)
    }

    /// # Errors
    /// `ConnectionClosed`, a closed-cursor `ExecutionError`, or the driver's error.
    pub async fn execute_script(&mut self, script: &str) -> Result<&mut Self, SqliteBridgeError> {
        self.ensure_usable()?;
        let next = self.conn.execute_script(script).await?;
        self.adopt(next);
        Ok(self)
    }

    fn adopt(&mut self, next: Cursor<D>) {
        self.native = next.native;
        self.row_count = next.row_count;
        self.last_row_id = next.last_row_id;
        self.description = next.description;
    }

    /// Next row, or `None` once the result is exhausted.
    ///
    /// # Errors
    /// `ConnectionClosed`, a closed-cursor `ExecutionError`, or the driver's error.
    pub async fn fetch_one(&self) -> Result<Option<Row>, SqliteBridgeError> {
        self.with_native(|native| native.fetch_one()).await
    }

    /// Up to `size` rows; [`array_size`](Self::array_size) when `size` is `None`.
    ///
    /// # Errors
    /// `ConnectionClosed`, a closed-cursor `ExecutionError`, or the driver's error.
    pub async fn fetch_many(&self, size: Option<usize>) -> Result<Vec<Row>, SqliteBridgeError> {
        let size = size.unwrap_or(self.array_size);
        self.with_native(move |native| native.fetch_many(size)).await
    }

    /// # Errors
    /// `ConnectionClosed`, a closed-cursor `ExecutionError`, or the driver's error.
    pub async fn fetch_all(&self) -> Result<Vec<Row>, SqliteBridgeError> {
        self.with_native(|native| native.fetch_all()).await
    }

    /// Stream the remaining rows one fetch at a time.
    pub fn rows(&self) -> impl Stream<Item = Result<Row, SqliteBridgeError>> + '_ {
        stream::try_unfold(self, |cursor| async move {
            let row = cursor.fetch_one().await?;
            Ok::<_, SqliteBridgeError>(row.map(|row| (row, cursor)))
        })
    }

    /// Close the native cursor. Further fetches fail; closing twice is fine.
    ///
    /// # Errors
    /// Whatever the driver reports while closing.
    pub async fn close(&mut self) -> Result<(), SqliteBridgeError> {
        if self.closed {
            return Ok(());
        }
        if self.conn.closed() {
            self.closed = true;
            return Ok(());
        }
        let result = self.with_native(|native| native.close()).await;
        self.closed = true;
        result
    }

    /// Rows changed by the last DML statement, `-1` otherwise.
    #[must_use]
    pub fn row_count(&self) -> i64 {
        self.row_count
    }

    #[must_use]
    pub fn last_row_id(&self) -> Option<i64> {
        self.last_row_id
    }

    /// Column names of the last query.
    #[must_use]
    pub fn description(&self) -> Option<&[String]> {
        self.description.as_deref().map(Vec::as_slice)
    }

    #[must_use]
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    pub fn set_array_size(&mut self, size: usize) {
        self.array_size = size.max(1);
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn connection(&self) -> &Connection<D> {
        &self.conn
    }
}
