use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::driver::Driver;
use crate::error::SqliteBridgeError;
use crate::types::IsolationLevel;

use super::Connection;

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

#[allow(clippy::unnecessary_wraps)]
fn default_isolation_level() -> Option<IsolationLevel> {
    Some(IsolationLevel::Deferred)
}

/// Options for opening a [`Connection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Database path, `:memory:`, or a `file:` URI when `uri` is set.
    pub target: String,
    /// How long a statement waits on a locked database before failing.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    /// `None` disables implicit transactions.
    #[serde(default = "default_isolation_level")]
    pub isolation_level: Option<IsolationLevel>,
    /// Pin the handle to a dedicated worker thread.
    #[serde(default)]
    pub single_writer: bool,
    /// Log every statement at `info` level.
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub uri: bool,
}

impl ConnectOptions {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            timeout: default_timeout(),
            isolation_level: default_isolation_level(),
            single_writer: false,
            echo: false,
            read_only: false,
            uri: false,
        }
    }

    #[must_use]
    pub fn with_single_writer(mut self, single_writer: bool) -> Self {
        self.single_writer = single_writer;
        self
    }

    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Fluent builder for connection options.
#[derive(Debug, Clone)]
pub struct ConnectOptionsBuilder {
    opts: ConnectOptions,
}

impl ConnectOptionsBuilder {
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            opts: ConnectOptions::new(target),
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    #[must_use]
    pub fn isolation_level(mut self, level: Option<IsolationLevel>) -> Self {
        self.opts.isolation_level = level;
        self
    }

    #[must_use]
    pub fn single_writer(mut self, single_writer: bool) -> Self {
        self.opts.single_writer = single_writer;
        self
    }

    #[must_use]
    pub fn echo(mut self, echo: bool) -> Self {
        self.opts.echo = echo;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.opts.read_only = read_only;
        self
    }

    #[must_use]
    pub fn uri(mut self, uri: bool) -> Self {
        self.opts.uri = uri;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectOptions {
        self.opts
    }

    /// Open a connection with the collected options.
    ///
    /// # Errors
    ///
    /// Returns `SqliteBridgeError` if the driver cannot open the target or the worker fails to start.
    pub async fn connect<D: Driver>(
        self,
        executor: Handle,
        driver: Arc<D>,
    ) -> Result<Connection<D>, SqliteBridgeError> {
        Connection::connect(executor, driver, self.finish()).await
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn builder(target: impl Into<String>) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(target)
    }
}
