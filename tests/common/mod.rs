#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use sqlite_bridge::prelude::*;
use tempfile::tempdir;
use thiserror::Error;

pub fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

#[derive(Debug, Error)]
#[error("fake driver: {0}")]
pub struct FakeError(pub String);

type CallLog = Arc<Mutex<Vec<(String, ThreadId)>>>;

fn record(log: &CallLog, op: &str) {
    log.lock()
        .expect("call log")
        .push((op.to_string(), thread::current().id()));
}

/// Logs `thread_exit` when the thread that opened a handle finishes.
struct ExitRecorder {
    calls: CallLog,
    thread: ThreadId,
}

impl Drop for ExitRecorder {
    fn drop(&mut self) {
        // The thread id is captured up front; `thread::current()` is not
        // reliable while thread-locals are being torn down.
        if let Ok(mut log) = self.calls.lock() {
            log.push(("thread_exit".to_string(), self.thread));
        }
    }
}

thread_local! {
    static EXIT_RECORDER: RefCell<Option<ExitRecorder>> = const { RefCell::new(None) };
}

/// In-memory driver that logs every call with the thread it ran on.
///
/// `execute` understands a few magic statements: `FAIL` returns a driver
/// error, `PANIC` panics, and anything starting with `SELECT` yields one row
/// holding the statement text.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: CallLog,
    fail_opens_after: Mutex<Option<usize>>,
    opens: AtomicUsize,
    open_delay: Option<Duration>,
    track_thread_exit: bool,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Let `ok` opens succeed, then refuse every later one.
    pub fn failing_after(ok: usize) -> Arc<Self> {
        let driver = Self::default();
        *driver.fail_opens_after.lock().expect("fail config") = Some(ok);
        Arc::new(driver)
    }

    /// Block every `open` for `delay`.
    pub fn slow_open(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open_delay: Some(delay),
            ..Self::default()
        })
    }

    /// Record `thread_exit` when a thread that opened a handle exits.
    pub fn tracking_thread_exit() -> Arc<Self> {
        Arc::new(Self {
            track_thread_exit: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<(String, ThreadId)> {
        self.calls.lock().expect("call log").clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls().iter().filter(|(name, _)| name == op).count()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.calls().into_iter().map(|(_, id)| id).collect()
    }
}

impl Driver for RecordingDriver {
    type Handle = RecordingHandle;

    fn open(
        &self,
        target: &str,
        options: &ConnectOptions,
    ) -> Result<Self::Handle, SqliteBridgeError> {
        record(&self.calls, "open");
        if let Some(delay) = self.open_delay {
            thread::sleep(delay);
        }
        if self.track_thread_exit {
            EXIT_RECORDER.with(|slot| {
                slot.borrow_mut().get_or_insert_with(|| ExitRecorder {
                    calls: Arc::clone(&self.calls),
                    thread: thread::current().id(),
                });
            });
        }
        let previous = self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(ok) = *self.fail_opens_after.lock().expect("fail config") {
            if previous >= ok {
                return Err(SqliteBridgeError::driver(FakeError(format!(
                    "refusing to open {target}"
                ))));
            }
        }
        Ok(RecordingHandle {
            calls: Arc::clone(&self.calls),
            isolation_level: options.isolation_level,
            row_factory: RowFactory::default(),
            text_factory: TextFactory::default(),
            in_transaction: false,
            changes: 0,
        })
    }
}

#[derive(Debug)]
pub struct RecordingHandle {
    calls: CallLog,
    isolation_level: Option<IsolationLevel>,
    row_factory: RowFactory,
    text_factory: TextFactory,
    in_transaction: bool,
    changes: u64,
}

impl DriverHandle for RecordingHandle {
    type Cursor = RecordingCursor;

    fn execute(
        &mut self,
        sql: &str,
        _params: &[RowValues],
    ) -> Result<Self::Cursor, SqliteBridgeError> {
        record(&self.calls, "execute");
        match sql {
            "FAIL" => Err(SqliteBridgeError::driver(FakeError("statement failed".into()))),
            "PANIC" => panic!("driver panicked"),
            _ if sql.starts_with("SELECT") => Ok(RecordingCursor::with_rows(
                Arc::clone(&self.calls),
                vec![Row::Tuple(vec![RowValues::Text(sql.to_string())])],
            )),
            _ => {
                if self.isolation_level.is_some() {
                    self.in_transaction = true;
                }
                self.changes += 1;
                Ok(RecordingCursor::with_rows(Arc::clone(&self.calls), Vec::new()))
            }
        }
    }

    fn execute_many(
        &mut self,
        _sql: &str,
        param_sets: &[Vec<RowValues>],
    ) -> Result<Self::Cursor, SqliteBridgeError> {
        record(&self.calls, "execute_many");
        self.changes += param_sets.len() as u64;
        Ok(RecordingCursor::with_rows(Arc::clone(&self.calls), Vec::new()))
    }

    fn execute_script(&mut self, _script: &str) -> Result<Self::Cursor, SqliteBridgeError> {
        record(&self.calls, "execute_script");
        self.in_transaction = false;
        Ok(RecordingCursor::with_rows(Arc::clone(&self.calls), Vec::new()))
    }

    fn cursor(&mut self) -> Result<Self::Cursor, SqliteBridgeError> {
        record(&self.calls, "cursor");
        Ok(RecordingCursor::with_rows(Arc::clone(&self.calls), Vec::new()))
    }

    fn commit(&mut self) -> Result<(), SqliteBridgeError> {
        record(&self.calls, "commit");
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SqliteBridgeError> {
        record(&self.calls, "rollback");
        self.in_transaction = false;
        Ok(())
    }

    fn close(self) -> Result<(), SqliteBridgeError> {
        record(&self.calls, "close");
        Ok(())
    }

    fn isolation_level(&self) -> Option<IsolationLevel> {
        record(&self.calls, "isolation_level");
        self.isolation_level
    }

    fn set_isolation_level(
        &mut self,
        level: Option<IsolationLevel>,
    ) -> Result<(), SqliteBridgeError> {
        record(&self.calls, "set_isolation_level");
        if level.is_none() {
            self.in_transaction = false;
        }
        self.isolation_level = level;
        Ok(())
    }

    fn row_factory(&self) -> RowFactory {
        record(&self.calls, "row_factory");
        self.row_factory
    }

    fn set_row_factory(&mut self, factory: RowFactory) {
        record(&self.calls, "set_row_factory");
        self.row_factory = factory;
    }

    fn text_factory(&self) -> TextFactory {
        record(&self.calls, "text_factory");
        self.text_factory
    }

    fn set_text_factory(&mut self, factory: TextFactory) {
        record(&self.calls, "set_text_factory");
        self.text_factory = factory;
    }

    fn in_transaction(&self) -> bool {
        record(&self.calls, "in_transaction");
        self.in_transaction
    }

    fn total_changes(&self) -> Result<u64, SqliteBridgeError> {
        record(&self.calls, "total_changes");
        Ok(self.changes)
    }
}

#[derive(Debug)]
pub struct RecordingCursor {
    calls: CallLog,
    rows: VecDeque<Row>,
}

impl RecordingCursor {
    fn with_rows(calls: CallLog, rows: Vec<Row>) -> Self {
        Self {
            calls,
            rows: rows.into(),
        }
    }
}

impl NativeCursor for RecordingCursor {
    fn fetch_one(&mut self) -> Result<Option<Row>, SqliteBridgeError> {
        record(&self.calls, "fetch_one");
        Ok(self.rows.pop_front())
    }

    fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>, SqliteBridgeError> {
        record(&self.calls, "fetch_many");
        let take = size.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    fn fetch_all(&mut self) -> Result<Vec<Row>, SqliteBridgeError> {
        record(&self.calls, "fetch_all");
        Ok(self.rows.drain(..).collect())
    }

    fn row_count(&self) -> i64 {
        -1
    }

    fn last_row_id(&self) -> Option<i64> {
        None
    }

    fn description(&self) -> Option<Arc<Vec<String>>> {
        None
    }

    fn close(&mut self) -> Result<(), SqliteBridgeError> {
        record(&self.calls, "cursor_close");
        self.rows.clear();
        Ok(())
    }
}
