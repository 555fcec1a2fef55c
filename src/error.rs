use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteBridgeError {
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Error raised by a non-rusqlite [`Driver`](crate::driver::Driver), passed through untouched.
    #[error(transparent)]
    DriverError(Box<dyn std::error::Error + Send + Sync>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Usage error: {0}")]
    UsageError(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Pool closed: {0}")]
    PoolClosed(String),

    #[error("Worker error: {0}")]
    WorkerError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl SqliteBridgeError {
    /// Wrap an error produced by a custom driver.
    pub fn driver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SqliteBridgeError::DriverError(Box::new(err))
    }

    /// True for errors raised because a connection or pool was already closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            SqliteBridgeError::ConnectionClosed | SqliteBridgeError::PoolClosed(_)
        )
    }
}

impl From<tokio::task::JoinError> for SqliteBridgeError {
    fn from(err: tokio::task::JoinError) -> Self {
        SqliteBridgeError::ExecutionError(format!("blocking task join error: {err}"))
    }
}
