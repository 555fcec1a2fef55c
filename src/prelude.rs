//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types so a single
//! `use sqlite_bridge::prelude::*;` is enough to get started.

pub use crate::connection::{ConnectOptions, ConnectOptionsBuilder, Connection, Cursor};
pub use crate::driver::{Driver, DriverHandle, NativeCursor};
pub use crate::error::SqliteBridgeError;
pub use crate::pool::{Pool, PoolOptions, PoolOptionsBuilder, PoolStatus, PooledConnection};
pub use crate::sqlite::{SqliteDriver, SqliteHandle};
pub use crate::types::{IsolationLevel, Row, RowFactory, RowValues, TextFactory};
