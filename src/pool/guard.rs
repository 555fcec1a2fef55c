use std::fmt;
use std::ops::Deref;

use tracing::warn;

use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::SqliteBridgeError;
use crate::sqlite::SqliteDriver;

use super::Pool;

/// A connection checked out of a [`Pool`].
///
/// Call [`release`](Self::release) when done. Dropping the guard instead logs
/// a warning and hands the connection back on the pool's runtime.
pub struct PooledConnection<D: Driver = SqliteDriver> {
    pool: Pool<D>,
    conn: Connection<D>,
    released: bool,
}

impl<D: Driver> PooledConnection<D> {
    pub(crate) fn new(pool: Pool<D>, conn: Connection<D>) -> Self {
        Self {
            pool,
            conn,
            released: false,
        }
    }

    /// Give the connection back to its pool.
    ///
    /// # Errors
    /// Error from closing the connection if the pool is closing.
    pub async fn release(mut self) -> Result<(), SqliteBridgeError> {
        self.released = true;
        self.pool.release(self.conn.clone()).await
    }

    #[must_use]
    pub fn pool(&self) -> &Pool<D> {
        &self.pool
    }
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = Connection<D>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<D: Driver> fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.conn)
            .field("released", &self.released)
            .finish()
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            connection = self.conn.id(),
            "pooled connection dropped without release; releasing in background"
        );
        let pool = self.pool.clone();
        let conn = self.conn.clone();
        self.pool.executor().spawn(async move {
            let id = conn.id();
            if let Err(err) = pool.release(conn).await {
                warn!(connection = id, error = %err, "background release failed");
            }
        });
    }
}
