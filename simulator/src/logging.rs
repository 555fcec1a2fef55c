use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Tees formatted log lines to stdout and, optionally, a log file.
#[derive(Clone)]
pub(crate) struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    pub(crate) fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
            None => None,
        };
        Ok(Self { file })
    }
}

pub(crate) struct LogWriterGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            file: self.file.clone(),
        }
    }
}

fn poisoned() -> io::Error {
    io::Error::other("log file lock poisoned")
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stdout = io::stdout();
        stdout.write_all(buf)?;
        if let Some(file) = &self.file {
            let mut handle = file.lock().map_err(|_| poisoned())?;
            handle.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = &self.file {
            let mut handle = file.lock().map_err(|_| poisoned())?;
            handle.flush()?;
        }
        Ok(())
    }
}

/// Keeps the opening steps and a rolling tail so a failure can be replayed
/// from the log without recording every step of a long run.
pub(crate) struct EventLog {
    first: Vec<String>,
    tail: VecDeque<String>,
    first_cap: usize,
    tail_cap: usize,
    skipped: u64,
}

impl EventLog {
    pub(crate) fn new(first_cap: usize, tail_cap: usize) -> Self {
        Self {
            first: Vec::with_capacity(first_cap),
            tail: VecDeque::with_capacity(tail_cap),
            first_cap,
            tail_cap,
            skipped: 0,
        }
    }

    pub(crate) fn record(&mut self, event: String) {
        if self.first.len() < self.first_cap {
            self.first.push(event);
            return;
        }
        if self.tail_cap == 0 {
            self.skipped += 1;
            return;
        }
        if self.tail.len() == self.tail_cap {
            self.tail.pop_front();
            self.skipped += 1;
        }
        self.tail.push_back(event);
    }

    pub(crate) fn dump_failure(&self, reason: &str) {
        tracing::error!("simulation failed: {reason}");
        for event in &self.first {
            tracing::error!("  {event}");
        }
        if self.skipped > 0 {
            tracing::error!("  ... {} steps elided ...", self.skipped);
        }
        for event in &self.tail {
            tracing::error!("  {event}");
        }
    }
}
