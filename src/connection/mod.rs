//! Async connections over a blocking driver handle.
//!
//! A [`Connection`] owns one native handle and forwards every operation
//! through an execution bridge: either the runtime's blocking pool or, with
//! [`ConnectOptions::single_writer`], a dedicated worker thread that is the
//! only thread ever to touch the handle.

mod bridge;
pub mod config;
pub mod cursor;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverHandle, NativeCursor};
use crate::error::SqliteBridgeError;
use crate::sqlite::SqliteDriver;
use crate::types::{IsolationLevel, RowFactory, RowValues, TextFactory};

use bridge::{Bridge, require};
use cursor::CursorMeta;

pub use config::{ConnectOptions, ConnectOptionsBuilder};
pub use cursor::Cursor;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
struct Settings {
    isolation_level: Option<IsolationLevel>,
    row_factory: RowFactory,
    text_factory: TextFactory,
}

impl Settings {
    fn read<H: DriverHandle>(handle: &H) -> Self {
        Self {
            isolation_level: handle.isolation_level(),
            row_factory: handle.row_factory(),
            text_factory: handle.text_factory(),
        }
    }
}

/// An open database connection.
///
/// Cloning is cheap and yields another reference to the same handle.
pub struct Connection<D: Driver = SqliteDriver> {
    inner: Arc<ConnectionInner<D>>,
}

struct ConnectionInner<D: Driver> {
    id: u64,
    options: ConnectOptions,
    bridge: Bridge<D::Handle>,
    closed: AtomicBool,
    settings: Mutex<Settings>,
}

impl<D: Driver> Clone for Connection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> fmt::Debug for Connection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("target", &self.inner.options.target)
            .field("single_writer", &self.inner.options.single_writer)
            .field("closed", &self.closed())
            .finish()
    }
}

impl<D: Driver> Connection<D> {
    /// Open a connection; the driver's `open` runs through the bridge.
    ///
    /// # Errors
    /// Returns the driver's error if the target cannot be opened, or
    /// `WorkerError` if the single-writer thread cannot be started.
    pub async fn connect(
        executor: Handle,
        driver: Arc<D>,
        options: ConnectOptions,
    ) -> Result<Self, SqliteBridgeError> {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let bridge = Bridge::new(executor, options.single_writer, id)?;

        let open_options = options.clone();
        let opened = bridge
            .run(move |slot| {
                let handle = driver.open(&open_options.target, &open_options)?;
                let settings = Settings::read(&handle);
                *slot = Some(handle);
                Ok(settings)
            })
            .await;

        let settings = match opened {
            Ok(settings) => settings,
            Err(err) => {
                if let Err(stop_err) = bridge.shutdown().await {
                    debug!(connection = id, error = %stop_err, "worker stop after failed open");
                }
                return Err(err);
            }
        };

        if options.echo {
            debug!(
                connection = id,
                db = %options.target,
                single_writer = options.single_writer,
                "connection opened"
            );
        }

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id,
                options,
                bridge,
                closed: AtomicBool::new(false),
                settings: Mutex::new(settings),
            }),
        })
    }

    /// Run `func` against the open handle through the bridge.
    pub(crate) async fn run<R, F>(&self, func: F) -> Result<R, SqliteBridgeError>
    where
        F: FnOnce(&mut D::Handle) -> Result<R, SqliteBridgeError> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_open()?;
        self.inner
            .bridge
            .run(move |slot| func(require(slot)?))
            .await
    }

    fn ensure_open(&self) -> Result<(), SqliteBridgeError> {
        if self.closed() {
            Err(SqliteBridgeError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn echo_statement(&self, sql: &str, params: &[RowValues]) {
        if self.inner.options.echo {
            info!(connection = self.inner.id, sql, ?params, "execute");
        }
    }

    fn settings(&self) -> Settings {
        *self
            .inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        update(
            &mut self
                .inner
                .settings
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    /// Execute one statement and return a cursor over its result.
    ///
    /// # Errors
    /// `ConnectionClosed` after [`close`](Self::close); otherwise whatever the driver reports.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[RowValues],
    ) -> Result<Cursor<D>, SqliteBridgeError> {
        self.echo_statement(sql, params);
        let sql = sql.to_owned();
        let params = params.to_vec();
        let native = self
            .run(move |handle| with_meta(handle.execute(&sql, &params)))
            .await?;
        Ok(Cursor::from_native(self.clone(), native))
    }

    /// Execute one DML statement once per parameter set.
    ///
    /// # Errors
    /// `ConnectionClosed` after close; otherwise whatever the driver reports.
    pub async fn execute_many(
        &self,
        sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Cursor<D>, SqliteBridgeError> {
        if self.inner.options.echo {
            info!(
                connection = self.inner.id,
                sql,
                sets = param_sets.len(),
                "execute_many"
            );
        }
        let sql = sql.to_owned();
        let param_sets = param_sets.to_vec();
        let native = self
            .run(move |handle| with_meta(handle.execute_many(&sql, &param_sets)))
            .await?;
        Ok(Cursor::from_native(self.clone(), native))
    }

    /// Execute a multi-statement script.
    ///
    /// # Errors
    /// `ConnectionClosed` after close; otherwise whatever the driver reports.
    pub async fn execute_script(&self, script: &str) -> Result<Cursor<D>, SqliteBridgeError> {
        if self.inner.options.echo {
            info!(connection = self.inner.id, script, "execute_script");
        }
        let script = script.to_owned();
        let native = self
            .run(move |handle| with_meta(handle.execute_script(&script)))
            .await?;
        Ok(Cursor::from_native(self.clone(), native))
    }

    /// A cursor that has not executed anything yet.
    ///
    /// # Errors
    /// `ConnectionClosed` after close.
    pub async fn cursor(&self) -> Result<Cursor<D>, SqliteBridgeError> {
        let native = self.run(|handle| with_meta(handle.cursor())).await?;
        Ok(Cursor::from_native(self.clone(), native))
    }

    /// # Errors
    /// `ConnectionClosed` after close; otherwise whatever the driver reports.
    pub async fn commit(&self) -> Result<(), SqliteBridgeError> {
        if self.inner.options.echo {
            info!(connection = self.inner.id, "commit");
        }
        self.run(|handle| handle.commit()).await
    }

    /// # Errors
    /// `ConnectionClosed` after close; otherwise whatever the driver reports.
    pub async fn rollback(&self) -> Result<(), SqliteBridgeError> {
        if self.inner.options.echo {
            info!(connection = self.inner.id, "rollback");
        }
        self.run(|handle| handle.rollback()).await
    }

    /// Close the handle, then stop the worker if there is one.
    ///
    /// Idempotent: only the first call does any work. The connection counts as
    /// closed from the moment the first call starts.
    ///
    /// # Errors
    /// The first error from closing the handle or stopping the worker.
    pub async fn close(&self) -> Result<(), SqliteBridgeError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let closed = self.inner.bridge.run(close_slot::<D::Handle>).await;
        let stopped = self.inner.bridge.shutdown().await;
        if self.inner.options.echo {
            debug!(connection = self.inner.id, "connection closed");
        }
        closed.and(stopped)
    }

    /// Blocking variant of [`close`](Self::close) for teardown code that cannot await.
    ///
    /// Blocks the calling thread until the handle is closed.
    ///
    /// # Errors
    /// The first error from closing the handle or stopping the worker.
    pub fn close_sync(&self) -> Result<(), SqliteBridgeError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.close_now()
    }

    /// Run arbitrary blocking code against the native handle.
    ///
    /// # Errors
    /// `ConnectionClosed` after close, or whatever `func` returns.
    pub async fn with_handle<R, F>(&self, func: F) -> Result<R, SqliteBridgeError>
    where
        F: FnOnce(&mut D::Handle) -> Result<R, SqliteBridgeError> + Send + 'static,
        R: Send + 'static,
    {
        self.run(func).await
    }

    /// Blocking variant of [`with_handle`](Self::with_handle); blocks the
    /// calling thread, so keep it out of async code paths.
    ///
    /// # Errors
    /// `ConnectionClosed` after close, or whatever `func` returns.
    pub fn with_handle_sync<R, F>(&self, func: F) -> Result<R, SqliteBridgeError>
    where
        F: FnOnce(&mut D::Handle) -> Result<R, SqliteBridgeError> + Send + 'static,
        R: Send + 'static,
    {
        self.ensure_open()?;
        self.inner.bridge.run_sync(move |slot| func(require(slot)?))
    }

    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.settings().isolation_level
    }

    /// `None` switches to autocommit and commits any pending transaction.
    ///
    /// # Errors
    /// `ConnectionClosed` after close; otherwise whatever the driver reports.
    pub async fn set_isolation_level(
        &self,
        level: Option<IsolationLevel>,
    ) -> Result<(), SqliteBridgeError> {
        self.run(move |handle| handle.set_isolation_level(level))
            .await?;
        self.update_settings(|s| s.isolation_level = level);
        Ok(())
    }

    #[must_use]
    pub fn row_factory(&self) -> RowFactory {
        self.settings().row_factory
    }

    /// # Errors
    /// `ConnectionClosed` after close.
    pub async fn set_row_factory(&self, factory: RowFactory) -> Result<(), SqliteBridgeError> {
        self.run(move |handle| {
            handle.set_row_factory(factory);
            Ok(())
        })
        .await?;
        self.update_settings(|s| s.row_factory = factory);
        Ok(())
    }

    #[must_use]
    pub fn text_factory(&self) -> TextFactory {
        self.settings().text_factory
    }

    /// # Errors
    /// `ConnectionClosed` after close.
    pub async fn set_text_factory(&self, factory: TextFactory) -> Result<(), SqliteBridgeError> {
        self.run(move |handle| {
            handle.set_text_factory(factory);
            Ok(())
        })
        .await?;
        self.update_settings(|s| s.text_factory = factory);
        Ok(())
    }

    /// True when no isolation level is set.
    #[must_use]
    pub fn autocommit(&self) -> bool {
        self.isolation_level().is_none()
    }

    /// # Errors
    /// `ConnectionClosed` after close.
    pub async fn in_transaction(&self) -> Result<bool, SqliteBridgeError> {
        self.run(|handle| Ok(handle.in_transaction())).await
    }

    /// # Errors
    /// `ConnectionClosed` after close; otherwise whatever the driver reports.
    pub async fn total_changes(&self) -> Result<u64, SqliteBridgeError> {
        self.run(|handle| handle.total_changes()).await
    }

    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Process-unique identifier, stable for the connection's life.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn echo(&self) -> bool {
        self.inner.options.echo
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.options.timeout
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.inner.options.target
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn is_single_writer(&self) -> bool {
        self.inner.options.single_writer
    }

    /// The worker thread owning the handle, in single-writer mode.
    #[must_use]
    pub fn worker_thread_id(&self) -> Option<ThreadId> {
        self.inner.bridge.worker_thread_id()
    }

    pub(crate) fn executor(&self) -> &Handle {
        self.inner.bridge.executor()
    }
}

fn with_meta<C: NativeCursor>(
    native: Result<C, SqliteBridgeError>,
) -> Result<(C, CursorMeta), SqliteBridgeError> {
    native.map(|native| {
        let meta = CursorMeta::read(&native);
        (native, meta)
    })
}

fn close_slot<H: DriverHandle>(slot: &mut Option<H>) -> Result<(), SqliteBridgeError> {
    match slot.take() {
        Some(handle) => handle.close(),
        None => Ok(()),
    }
}

impl<D: Driver> ConnectionInner<D> {
    fn close_now(&self) -> Result<(), SqliteBridgeError> {
        let closed = self.bridge.run_sync(close_slot::<D::Handle>);
        let stopped = self.bridge.shutdown_sync();
        if self.options.echo {
            debug!(connection = self.id, "connection closed");
        }
        closed.and(stopped)
    }
}

impl<D: Driver> Drop for ConnectionInner<D> {
    fn drop(&mut self) {
        if *self.closed.get_mut() {
            return;
        }
        warn!(
            connection = self.id,
            db = %self.options.target,
            "connection dropped without close; closing synchronously"
        );
        // The worker releases its own slot once the bridge drops.
        if self.bridge.on_worker_thread() {
            return;
        }
        if let Err(err) = self.close_now() {
            warn!(connection = self.id, error = %err, "close during drop failed");
        }
    }
}
