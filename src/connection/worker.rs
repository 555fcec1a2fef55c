use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::SqliteBridgeError;

pub(crate) type Payload = Box<dyn Any + Send>;

/// Work shipped to the thread that owns the handle slot.
pub(crate) type Job<H> =
    Box<dyn FnOnce(&mut Option<H>) -> Result<Payload, SqliteBridgeError> + Send>;

enum Request<H> {
    Run(Job<H>),
    Stop,
}

enum Response {
    Done(Result<Payload, SqliteBridgeError>),
    Stopped,
}

struct WorkerPort<H> {
    requests: Sender<Request<H>>,
    responses: Receiver<Response>,
    thread: Option<JoinHandle<()>>,
}

/// A dedicated thread that owns a native handle for its whole life.
///
/// Every request is answered before the next one is accepted: callers queue on
/// `admission` (a fair async lock) and then hold `port` for one send/receive
/// pair, so the request and response channels never carry more than one
/// message each.
pub(crate) struct SingleWriter<H> {
    port: Mutex<Option<WorkerPort<H>>>,
    admission: tokio::sync::Mutex<()>,
    thread_id: ThreadId,
    name: String,
}

impl<H: Send + 'static> SingleWriter<H> {
    pub(crate) fn spawn(connection_id: u64) -> Result<Self, SqliteBridgeError> {
        let (request_tx, request_rx) = mpsc::channel::<Request<H>>();
        let (response_tx, response_rx) = mpsc::channel::<Response>();
        let name = format!("sqlite-bridge-writer-{connection_id}");

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&request_rx, &response_tx))
            .map_err(|err| {
                SqliteBridgeError::WorkerError(format!(
                    "failed to spawn single-writer thread: {err}"
                ))
            })?;
        let thread_id = thread.thread().id();
        debug!(worker = %name, "single-writer worker started");

        Ok(Self {
            port: Mutex::new(Some(WorkerPort {
                requests: request_tx,
                responses: response_rx,
                thread: Some(thread),
            })),
            admission: tokio::sync::Mutex::new(()),
            thread_id,
            name,
        })
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub(crate) fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Submit `job` and block until the worker answers.
    pub(crate) fn round_trip(&self, job: Job<H>) -> Result<Payload, SqliteBridgeError> {
        if self.on_worker_thread() {
            return Err(SqliteBridgeError::WorkerError(
                "cannot submit work from the worker's own thread".into(),
            ));
        }
        let guard = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(port) = guard.as_ref() else {
            return Err(SqliteBridgeError::ConnectionClosed);
        };

        port.requests.send(Request::Run(job)).map_err(|_| {
            SqliteBridgeError::WorkerError(format!("{} is no longer running", self.name))
        })?;

        match port.responses.recv() {
            Ok(Response::Done(result)) => result,
            Ok(Response::Stopped) => Err(SqliteBridgeError::WorkerError(format!(
                "{} acknowledged a stop that was never requested",
                self.name
            ))),
            Err(_) => Err(SqliteBridgeError::WorkerError(format!(
                "{} exited without answering",
                self.name
            ))),
        }
    }

    /// Submit `job` from async code, in arrival order.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        executor: &Handle,
        job: Job<H>,
    ) -> Result<Payload, SqliteBridgeError> {
        let _admitted = self.admission.lock().await;
        let worker = Arc::clone(self);
        executor
            .spawn_blocking(move || worker.round_trip(job))
            .await?
    }

    pub(crate) async fn stop(self: &Arc<Self>, executor: &Handle) -> Result<(), SqliteBridgeError> {
        let _admitted = self.admission.lock().await;
        let worker = Arc::clone(self);
        executor.spawn_blocking(move || worker.stop_sync()).await?
    }

    /// Send the stop sentinel, wait for its acknowledgment and join the thread.
    ///
    /// A second call is a no-op.
    pub(crate) fn stop_sync(&self) -> Result<(), SqliteBridgeError> {
        let taken = self
            .port
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut port) = taken else {
            return Ok(());
        };

        let acknowledged = port
            .requests
            .send(Request::Stop)
            .ok()
            .and_then(|()| port.responses.recv().ok());

        if let Some(thread) = port.thread.take()
            && !self.on_worker_thread()
        {
            thread.join().map_err(|_| {
                SqliteBridgeError::WorkerError(format!("{} panicked while stopping", self.name))
            })?;
        }
        debug!(worker = %self.name, "single-writer worker stopped");

        match acknowledged {
            Some(Response::Stopped) => Ok(()),
            Some(Response::Done(_)) => Err(SqliteBridgeError::WorkerError(format!(
                "{} answered stop with a job result",
                self.name
            ))),
            None => Err(SqliteBridgeError::WorkerError(format!(
                "{} did not acknowledge stop",
                self.name
            ))),
        }
    }
}

impl<H> fmt::Debug for SingleWriter<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleWriter")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

impl<H> Drop for SingleWriter<H> {
    fn drop(&mut self) {
        let port = self
            .port
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(port) = port {
            warn!(worker = %self.name, "single-writer worker dropped without stop");
            let _ = port.requests.send(Request::Stop);
        }
    }
}

fn run_worker<H>(requests: &Receiver<Request<H>>, responses: &Sender<Response>) {
    let mut slot: Option<H> = None;
    while let Ok(request) = requests.recv() {
        match request {
            Request::Run(job) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| job(&mut slot)))
                    .unwrap_or_else(|panic| {
                        Err(SqliteBridgeError::WorkerError(format!(
                            "job panicked on single-writer thread: {}",
                            panic_message(panic.as_ref())
                        )))
                    });
                if responses.send(Response::Done(result)).is_err() {
                    break;
                }
            }
            Request::Stop => {
                let _ = responses.send(Response::Stopped);
                break;
            }
        }
    }
    // Anything still in the slot is released here, on the owning thread.
    drop(slot);
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
