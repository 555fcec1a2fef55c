// SQLite module - the rusqlite-backed driver
//
// - handle: driver, handle and the implicit transaction rules
// - cursor: buffered statement results
// - params: parameter conversion between bridge and SQLite types
// - query: row extraction honoring row/text factories

pub mod cursor;
pub mod handle;
pub mod params;
pub mod query;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::connection::{ConnectOptions, Connection};
use crate::error::SqliteBridgeError;
use crate::pool::{Pool, PoolOptions};

pub use cursor::SqliteCursor;
pub use handle::{SqliteDriver, SqliteHandle};
pub use params::{Params, row_value_to_sqlite_value};

/// Open a single rusqlite-backed connection.
///
/// # Errors
/// Returns `SqliteBridgeError` if the database cannot be opened or the worker fails to start.
pub async fn connect(
    executor: Handle,
    options: ConnectOptions,
) -> Result<Connection<SqliteDriver>, SqliteBridgeError> {
    Connection::connect(executor, Arc::new(SqliteDriver), options).await
}

/// Create a pool of rusqlite-backed connections.
///
/// # Errors
/// Returns `SqliteBridgeError` if the options are invalid or prefill fails.
pub async fn create_pool(
    executor: Handle,
    options: PoolOptions,
) -> Result<Pool<SqliteDriver>, SqliteBridgeError> {
    Pool::create(executor, Arc::new(SqliteDriver), options).await
}
