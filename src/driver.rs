//! The blocking driver surface the bridge and pool are built on.
//!
//! Everything here is synchronous. Implementations never see the async side:
//! the bridge decides which thread a call lands on, and a handle opened by a
//! single-writer connection is only ever touched from that connection's worker
//! thread (including [`Driver::open`] and [`DriverHandle::close`]).

use std::sync::Arc;

use crate::connection::ConnectOptions;
use crate::error::SqliteBridgeError;
use crate::types::{IsolationLevel, Row, RowFactory, RowValues, TextFactory};

/// Opens native database handles.
pub trait Driver: Send + Sync + 'static {
    type Handle: DriverHandle;

    /// Open a handle to `target`.
    ///
    /// # Errors
    /// Returns the driver's own error when the target cannot be opened.
    fn open(
        &self,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Self::Handle, SqliteBridgeError>;
}

/// An open native database handle.
pub trait DriverHandle: Send + 'static {
    type Cursor: NativeCursor;

    fn execute(
        &mut self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Self::Cursor, SqliteBridgeError>;

    fn execute_many(
        &mut self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Self::Cursor, SqliteBridgeError>;

    fn execute_script(&mut self, script: &str) -> Result<Self::Cursor, SqliteBridgeError>;

    /// A cursor that has not run anything yet.
    fn cursor(&mut self) -> Result<Self::Cursor, SqliteBridgeError>;

    fn commit(&mut self) -> Result<(), SqliteBridgeError>;

    fn rollback(&mut self) -> Result<(), SqliteBridgeError>;

    /// Release the native handle.
    fn close(self) -> Result<(), SqliteBridgeError>;

    fn isolation_level(&self) -> Option<IsolationLevel>;

    fn set_isolation_level(
        &mut self,
        level: Option<IsolationLevel>,
    ) -> Result<(), SqliteBridgeError>;

    fn row_factory(&self) -> RowFactory;

    fn set_row_factory(&mut self, factory: RowFactory);

    fn text_factory(&self) -> TextFactory;

    fn set_text_factory(&mut self, factory: TextFactory);

    fn in_transaction(&self) -> bool;

    fn total_changes(&self) -> Result<u64, SqliteBridgeError>;
}

/// Result state produced by [`DriverHandle`] statement calls.
pub trait NativeCursor: Send + 'static {
    fn fetch_one(&mut self) -> Result<Option<Row>, SqliteBridgeError>;

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>, SqliteBridgeError>;

    fn fetch_all(&mut self) -> Result<Vec<Row>, SqliteBridgeError>;

    /// Rows changed by the last DML statement, `-1` when not applicable.
    fn row_count(&self) -> i64;

    fn last_row_id(&self) -> Option<i64>;

    /// Column names of the last query, `None` if it produced no result columns.
    fn description(&self) -> Option<Arc<Vec<String>>>;

    fn close(&mut self) -> Result<(), SqliteBridgeError>;
}
