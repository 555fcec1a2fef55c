use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::connection::ConnectOptions;
use crate::driver::Driver;
use crate::error::SqliteBridgeError;

use super::Pool;

fn default_minsize() -> usize {
    1
}

fn default_maxsize() -> usize {
    10
}

/// Sizing and connection options for a [`Pool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Connections kept open even when idle.
    #[serde(default = "default_minsize")]
    pub minsize: usize,
    /// Hard cap on open connections, idle or acquired.
    #[serde(default = "default_maxsize")]
    pub maxsize: usize,
    /// Options every pooled connection is opened with.
    pub connect: ConnectOptions,
}

impl PoolOptions {
    #[must_use]
    pub fn new(connect: ConnectOptions) -> Self {
        Self {
            minsize: default_minsize(),
            maxsize: default_maxsize(),
            connect,
        }
    }

    /// Check the sizing bounds.
    ///
    /// # Errors
    /// `ConfigError` when `maxsize` is zero or smaller than `minsize`.
    pub fn validate(&self) -> Result<(), SqliteBridgeError> {
        if self.maxsize == 0 {
            return Err(SqliteBridgeError::ConfigError(
                "maxsize must be at least 1".into(),
            ));
        }
        if self.maxsize < self.minsize {
            return Err(SqliteBridgeError::ConfigError(format!(
                "maxsize ({}) should not be less than minsize ({})",
                self.maxsize, self.minsize
            )));
        }
        Ok(())
    }
}

/// Fluent builder for pool options.
#[derive(Debug, Clone)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn new(connect: ConnectOptions) -> Self {
        Self {
            opts: PoolOptions::new(connect),
        }
    }

    #[must_use]
    pub fn minsize(mut self, minsize: usize) -> Self {
        self.opts.minsize = minsize;
        self
    }

    #[must_use]
    pub fn maxsize(mut self, maxsize: usize) -> Self {
        self.opts.maxsize = maxsize;
        self
    }

    #[must_use]
    pub fn finish(self) -> PoolOptions {
        self.opts
    }

    /// Create the pool and open its first `minsize` connections.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for invalid sizing, or the first connection error during prefill.
    pub async fn build<D: Driver>(
        self,
        executor: Handle,
        driver: Arc<D>,
    ) -> Result<Pool<D>, SqliteBridgeError> {
        Pool::create(executor, driver, self.finish()).await
    }
}

impl PoolOptions {
    #[must_use]
    pub fn builder(connect: ConnectOptions) -> PoolOptionsBuilder {
        PoolOptionsBuilder::new(connect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized(minsize: usize, maxsize: usize) -> PoolOptions {
        PoolOptions::builder(ConnectOptions::new(":memory:"))
            .minsize(minsize)
            .maxsize(maxsize)
            .finish()
    }

    #[test]
    fn accepts_equal_and_zero_minimum_bounds() {
        assert!(sized(2, 2).validate().is_ok());
        assert!(sized(0, 1).validate().is_ok());
        assert!(PoolOptions::new(ConnectOptions::new("a.db")).validate().is_ok());
    }

    #[test]
    fn rejects_min_above_max_and_empty_pools() {
        assert!(matches!(
            sized(5, 2).validate(),
            Err(SqliteBridgeError::ConfigError(msg)) if msg.contains("minsize")
        ));
        assert!(matches!(
            sized(0, 0).validate(),
            Err(SqliteBridgeError::ConfigError(_))
        ));
    }

    #[test]
    fn deserializes_with_default_bounds() {
        let opts: PoolOptions =
            serde_json::from_str(r#"{"connect": {"target": ":memory:"}}"#).expect("valid options");
        assert_eq!(opts.minsize, 1);
        assert_eq!(opts.maxsize, 10);
        assert_eq!(opts.connect.target, ":memory:");
    }
}
