//! Async access to blocking `SQLite` handles.
//!
//! [`Connection`] moves every handle call off the async executor, either onto
//! the runtime's blocking pool or onto one dedicated worker thread per
//! connection (single-writer mode). [`Pool`] keeps a bounded set of
//! connections with acquire/release semantics and a graceful drain.
//!
//! ```rust,no_run
//! use sqlite_bridge::prelude::*;
//!
//! # async fn demo() -> Result<(), SqliteBridgeError> {
//! let executor = tokio::runtime::Handle::current();
//! let options = PoolOptions::builder(ConnectOptions::new("app.db"))
//!     .minsize(1)
//!     .maxsize(4)
//!     .finish();
//! let pool = sqlite_bridge::sqlite::create_pool(executor, options).await?;
//!
//! let conn = pool.connection().await?;
//! conn.execute("INSERT INTO users (name) VALUES (?1)", &[RowValues::Text("alice".into())])
//!     .await?;
//! conn.commit().await?;
//! conn.release().await?;
//!
//! pool.close();
//! pool.wait_closed().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod driver;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod sqlite;
pub mod types;

pub use connection::{ConnectOptions, ConnectOptionsBuilder, Connection, Cursor};
pub use driver::{Driver, DriverHandle, NativeCursor};
pub use error::SqliteBridgeError;
pub use pool::{Pool, PoolOptions, PoolOptionsBuilder, PoolStatus, PooledConnection};
pub use sqlite::{SqliteCursor, SqliteDriver, SqliteHandle};
pub use types::{IsolationLevel, Row, RowFactory, RowValues, TextFactory};
