use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use tokio::runtime::Handle;

use crate::error::SqliteBridgeError;

use super::worker::{Job, Payload, SingleWriter};

/// Runs blocking handle work without stalling the async executor.
///
/// In blocking mode each call lands on whatever thread the executor's
/// blocking pool picks; the mutex only grants exclusive access to the handle.
/// In single-writer mode every call is shipped to the connection's worker.
pub(crate) struct Bridge<H> {
    executor: Handle,
    dispatch: Dispatch<H>,
}

enum Dispatch<H> {
    Blocking { handle: Arc<Mutex<Option<H>>> },
    SingleWriter { worker: Arc<SingleWriter<H>> },
}

impl<H: Send + 'static> Bridge<H> {
    pub(crate) fn new(
        executor: Handle,
        single_writer: bool,
        connection_id: u64,
    ) -> Result<Self, SqliteBridgeError> {
        let dispatch = if single_writer {
            Dispatch::SingleWriter {
                worker: Arc::new(SingleWriter::spawn(connection_id)?),
            }
        } else {
            Dispatch::Blocking {
                handle: Arc::new(Mutex::new(None)),
            }
        };
        Ok(Self { executor, dispatch })
    }

    pub(crate) fn executor(&self) -> &Handle {
        &self.executor
    }

    pub(crate) fn worker_thread_id(&self) -> Option<ThreadId> {
        match &self.dispatch {
            Dispatch::Blocking { .. } => None,
            Dispatch::SingleWriter { worker } => Some(worker.thread_id()),
        }
    }

    pub(crate) fn on_worker_thread(&self) -> bool {
        match &self.dispatch {
            Dispatch::Blocking { .. } => false,
            Dispatch::SingleWriter { worker } => worker.on_worker_thread(),
        }
    }

    /// Run `func` against the handle slot off the async executor.
    pub(crate) async fn run<R, F>(&self, func: F) -> Result<R, SqliteBridgeError>
    where
        F: FnOnce(&mut Option<H>) -> Result<R, SqliteBridgeError> + Send + 'static,
        R: Send + 'static,
    {
        match &self.dispatch {
            Dispatch::Blocking { handle } => {
                let handle = Arc::clone(handle);
                self.executor
                    .spawn_blocking(move || run_locked(&handle, func))
                    .await?
            }
            Dispatch::SingleWriter { worker } => {
                let payload = worker.dispatch(&self.executor, box_job(func)).await?;
                downcast(payload)
            }
        }
    }

    /// Run `func` on the calling thread (blocking mode) or block on the worker.
    ///
    /// Only meant for teardown paths that cannot await.
    pub(crate) fn run_sync<R, F>(&self, func: F) -> Result<R, SqliteBridgeError>
    where
        F: FnOnce(&mut Option<H>) -> Result<R, SqliteBridgeError> + Send + 'static,
        R: Send + 'static,
    {
        match &self.dispatch {
            Dispatch::Blocking { handle } => run_locked(handle, func),
            Dispatch::SingleWriter { worker } => downcast(worker.round_trip(box_job(func))?),
        }
    }

    pub(crate) async fn shutdown(&self) -> Result<(), SqliteBridgeError> {
        match &self.dispatch {
            Dispatch::Blocking { .. } => Ok(()),
            Dispatch::SingleWriter { worker } => worker.stop(&self.executor).await,
        }
    }

    pub(crate) fn shutdown_sync(&self) -> Result<(), SqliteBridgeError> {
        match &self.dispatch {
            Dispatch::Blocking { .. } => Ok(()),
            Dispatch::SingleWriter { worker } => worker.stop_sync(),
        }
    }
}

fn run_locked<H, R, F>(handle: &Mutex<Option<H>>, func: F) -> Result<R, SqliteBridgeError>
where
    F: FnOnce(&mut Option<H>) -> Result<R, SqliteBridgeError>,
{
    let mut slot = handle.lock().map_err(|_| {
        SqliteBridgeError::ExecutionError("handle lock poisoned by an earlier panic".into())
    })?;
    func(&mut slot)
}

fn box_job<H, R, F>(func: F) -> Job<H>
where
    F: FnOnce(&mut Option<H>) -> Result<R, SqliteBridgeError> + Send + 'static,
    R: Send + 'static,
{
    Box::new(move |slot| func(slot).map(|value| Box::new(value) as Payload))
}

fn downcast<R: 'static>(payload: Payload) -> Result<R, SqliteBridgeError> {
    payload.downcast::<R>().map(|boxed| *boxed).map_err(|_| {
        SqliteBridgeError::WorkerError("single-writer response had an unexpected type".into())
    })
}

/// Borrow the open handle out of a slot.
pub(crate) fn require<H>(slot: &mut Option<H>) -> Result<&mut H, SqliteBridgeError> {
    slot.as_mut().ok_or(SqliteBridgeError::ConnectionClosed)
}
