//! Error types for dispatcher operations.

use thiserror::Error;

/// Result type for dispatcher operations.
pub type BusResult<T> = Result<T, BusError>;

/// Dispatcher and registry errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// Caller passed an argument the operation cannot act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not supported on this dispatcher
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Dispatcher was stopped and no longer accepts work
    #[error("Dispatcher '{0}' has been stopped")]
    Stopped(String),

    /// Worker thread could not be spawned
    #[error("Failed to spawn dispatcher worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
