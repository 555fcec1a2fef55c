//! Bounded pool of [`Connection`]s.
//!
//! Counters and the free/used collections live behind a short-lived state
//! lock. Long operations (opening or closing connections, waiting for a free
//! one) run under `cond`, an async lock paired with `notify`, so waiters sleep
//! without holding the state lock.

pub mod config;
pub mod guard;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::driver::Driver;
use crate::error::SqliteBridgeError;
use crate::sqlite::SqliteDriver;

pub use config::{PoolOptions, PoolOptionsBuilder};
pub use guard::PooledConnection;
pub use state::PoolStatus;

use state::PoolState;

/// A bounded, shareable pool of connections. Cloning yields another handle to
/// the same pool.
pub struct Pool<D: Driver = SqliteDriver> {
    inner: Arc<PoolInner<D>>,
}

struct PoolInner<D: Driver> {
    executor: Handle,
    driver: Arc<D>,
    options: PoolOptions,
    state: Mutex<PoolState<D>>,
    cond: tokio::sync::Mutex<()>,
    notify: Notify,
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.inner.options.connect.target)
            .field("status", &self.status())
            .finish()
    }
}

/// Marks one connection as being opened; undone on drop unless completed.
struct CreationSlot<'a, D: Driver> {
    pool: &'a PoolInner<D>,
    armed: bool,
}

impl<'a, D: Driver> CreationSlot<'a, D> {
    fn reserve(pool: &'a PoolInner<D>) -> Self {
        pool.state().acquiring += 1;
        Self { pool, armed: true }
    }

    fn complete(mut self, conn: Connection<D>) {
        let mut state = self.pool.state();
        state.acquiring -= 1;
        state.free.push_back(conn);
        self.armed = false;
    }
}

impl<D: Driver> Drop for CreationSlot<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state().acquiring -= 1;
        }
    }
}

impl<D: Driver> PoolInner<D> {
    fn state(&self) -> MutexGuard<'_, PoolState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop_free(&self) -> Option<Connection<D>> {
        self.state().free.pop_front()
    }

    async fn create_free_connection(&self) -> Result<(), SqliteBridgeError> {
        let slot = CreationSlot::reserve(self);
        let conn = Connection::connect(
            self.executor.clone(),
            Arc::clone(&self.driver),
            self.options.connect.clone(),
        )
        .await?;
        debug!(connection = conn.id(), "pool opened connection");
        slot.complete(conn);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Top the pool up to `minsize`, plus one more for a waiting acquirer when
    /// `override_min` is set and nothing is free. Caller holds `cond`.
    async fn fill_free_pool(&self, override_min: bool) -> Result<(), SqliteBridgeError> {
        loop {
            let below_min = {
                let state = self.state();
                !state.closing && state.size() < self.options.minsize
            };
            if !below_min {
                break;
            }
            self.create_free_connection().await?;
        }

        let wants_extra = {
            let state = self.state();
            override_min
                && !state.closing
                && state.free.is_empty()
                && state.size() < self.options.maxsize
        };
        if wants_extra {
            self.create_free_connection().await?;
        }
        Ok(())
    }

    async fn close_all_free(&self) -> Option<SqliteBridgeError> {
        let mut first_err = None;
        while let Some(conn) = self.pop_free() {
            if let Err(err) = conn.close().await {
                first_err.get_or_insert(err);
            }
        }
        first_err
    }
}

impl<D: Driver> Pool<D> {
    /// Validate `options`, then open `minsize` connections up front.
    ///
    /// # Errors
    /// `ConfigError` for invalid sizing (nothing is opened), or the first
    /// connection error during prefill, after the partial pool is shut down.
    pub async fn create(
        executor: Handle,
        driver: Arc<D>,
        options: PoolOptions,
    ) -> Result<Self, SqliteBridgeError> {
        options.validate()?;
        let pool = Self {
            inner: Arc::new(PoolInner {
                executor,
                driver,
                options,
                state: Mutex::new(PoolState::new()),
                cond: tokio::sync::Mutex::new(()),
                notify: Notify::new(),
            }),
        };

        let prefilled = {
            let _cond = pool.inner.cond.lock().await;
            pool.inner.fill_free_pool(false).await
        };
        if let Err(err) = prefilled {
            pool.close();
            if let Err(close_err) = pool.wait_closed().await {
                debug!(error = %close_err, "closing partially filled pool failed");
            }
            return Err(err);
        }

        debug!(
            db = %pool.inner.options.connect.target,
            minsize = pool.inner.options.minsize,
            maxsize = pool.inner.options.maxsize,
            "pool created"
        );
        Ok(pool)
    }

    /// Check a connection out, waiting while the pool is at `maxsize`.
    ///
    /// Waiters are not served in strict arrival order. Wrap the call in
    /// `tokio::time::timeout` to bound the wait; abandoning it leaves the pool
    /// untouched.
    ///
    /// # Errors
    /// `PoolClosed` once [`close`](Self::close) has been called, including for
    /// callers already waiting; otherwise any error from opening a connection.
    pub async fn acquire(&self) -> Result<Connection<D>, SqliteBridgeError> {
        let inner = &*self.inner;
        if inner.state().closing {
            return Err(closed_error());
        }

        let mut cond = inner.cond.lock().await;
        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if inner.state().closing {
                return Err(closed_error());
            }
            inner.fill_free_pool(true).await?;

            {
                let mut state = inner.state();
                // `close()` may have run while a connection was being opened;
                // that connection stays free for `wait_closed` to close.
                if state.closing {
                    return Err(closed_error());
                }
                if let Some(conn) = state.free.pop_front() {
                    assert!(!conn.closed(), "free connection {} is closed", conn.id());
                    assert!(
                        !state.used.contains_key(&conn.id()),
                        "free connection {} is already in use",
                        conn.id()
                    );
                    state.used.insert(conn.id(), conn.clone());
                    return Ok(conn);
                }
            }

            drop(cond);
            notified.await;
            cond = inner.cond.lock().await;
        }
    }

    /// Like [`acquire`](Self::acquire), wrapped in a guard that releases on
    /// [`PooledConnection::release`].
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub async fn connection(&self) -> Result<PooledConnection<D>, SqliteBridgeError> {
        let conn = self.acquire().await?;
        Ok(PooledConnection::new(self.clone(), conn))
    }

    /// Return an acquired connection.
    ///
    /// Goes back to the free list, or is closed if the pool is closing. A
    /// connection the caller already closed is simply dropped from the pool.
    ///
    /// # Panics
    /// If `conn` was not acquired from this pool (or was released twice).
    ///
    /// # Errors
    /// Error from closing `conn` while the pool is closing.
    pub async fn release(&self, conn: Connection<D>) -> Result<(), SqliteBridgeError> {
        let inner = &*self.inner;
        let _cond = inner.cond.lock().await;

        let to_close = {
            let mut state = inner.state();
            // Terminated ids are forgotten once the pool has closed.
            if state.terminated.remove(&conn.id()) || (state.closed && conn.closed()) {
                return Ok(());
            }
            assert!(
                state.used.remove(&conn.id()).is_some(),
                "released connection {} is not held by this pool",
                conn.id()
            );
            if conn.closed() {
                None
            } else if state.closing {
                Some(conn)
            } else {
                state.free.push_back(conn);
                None
            }
        };

        let result = match to_close {
            Some(conn) => conn.close().await,
            None => Ok(()),
        };
        inner.notify.notify_waiters();
        result
    }

    /// Stop handing out connections. Idempotent.
    ///
    /// Acquired connections stay open until released; pending and future
    /// `acquire` calls fail with `PoolClosed`.
    pub fn close(&self) {
        {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closing = true;
        }
        self.inner.notify.notify_waiters();
    }

    /// Close idle connections and wait until every acquired one comes back.
    ///
    /// # Errors
    /// `UsageError` if [`close`](Self::close) was not called first; otherwise
    /// the first error from closing a connection.
    pub async fn wait_closed(&self) -> Result<(), SqliteBridgeError> {
        let inner = &*self.inner;
        {
            let state = inner.state();
            if state.closed {
                return Ok(());
            }
            if !state.closing {
                return Err(SqliteBridgeError::UsageError(
                    "wait_closed() should be called after close()".into(),
                ));
            }
        }

        let mut first_err = None;
        let mut cond = inner.cond.lock().await;
        loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(err) = inner.close_all_free().await {
                first_err.get_or_insert(err);
            }
            {
                let mut state = inner.state();
                if state.used.is_empty() && state.acquiring == 0 {
                    state.closed = true;
                    state.terminated.clear();
                    break;
                }
            }

            drop(cond);
            notified.await;
            cond = inner.cond.lock().await;
        }
        drop(cond);

        debug!(db = %inner.options.connect.target, "pool closed");
        first_err.map_or(Ok(()), Err)
    }

    /// [`close`](Self::close), then force-close every acquired connection
    /// without waiting for it to be released.
    ///
    /// Blocks the calling thread while the connections close. Releasing a
    /// terminated connection later is a no-op.
    ///
    /// # Errors
    /// The first error from closing a connection.
    pub fn terminate(&self) -> Result<(), SqliteBridgeError> {
        self.close();
        let used: Vec<Connection<D>> = {
            let mut state = self.inner.state();
            let drained: Vec<Connection<D>> = state.used.drain().map(|(_, conn)| conn).collect();
            state.terminated.extend(drained.iter().map(Connection::id));
            drained
        };

        let mut first_err = None;
        for conn in used {
            if let Err(err) = conn.close_sync() {
                first_err.get_or_insert(err);
            }
        }
        self.inner.notify.notify_waiters();
        first_err.map_or(Ok(()), Err)
    }

    /// Close every idle connection; acquired ones are left alone.
    ///
    /// # Errors
    /// The first error from closing a connection.
    pub async fn clear(&self) -> Result<(), SqliteBridgeError> {
        let inner = &*self.inner;
        let first_err = {
            let _cond = inner.cond.lock().await;
            inner.close_all_free().await
        };
        inner.notify.notify_waiters();
        first_err.map_or(Ok(()), Err)
    }

    /// Open connections, idle, acquired and being opened.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state().size()
    }

    #[must_use]
    pub fn freesize(&self) -> usize {
        self.inner.state().free.len()
    }

    #[must_use]
    pub fn minsize(&self) -> usize {
        self.inner.options.minsize
    }

    #[must_use]
    pub fn maxsize(&self) -> usize {
        self.inner.options.maxsize
    }

    /// True once [`wait_closed`](Self::wait_closed) has finished.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.state().closed
    }

    #[must_use]
    pub fn echo(&self) -> bool {
        self.inner.options.connect.echo
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner
            .state()
            .status(self.inner.options.minsize, self.inner.options.maxsize)
    }

    pub(crate) fn executor(&self) -> &Handle {
        &self.inner.executor
    }
}

fn closed_error() -> SqliteBridgeError {
    SqliteBridgeError::PoolClosed("cannot acquire connection after closing pool".into())
}

impl<D: Driver> Drop for PoolInner<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        warn!(
            db = %self.options.connect.target,
            free = state.free.len(),
            used = state.used.len(),
            "pool dropped without wait_closed; closing idle connections"
        );
        for conn in state.free.drain(..) {
            if let Err(err) = conn.close_sync() {
                warn!(connection = conn.id(), error = %err, "close during drop failed");
            }
        }
    }
}
