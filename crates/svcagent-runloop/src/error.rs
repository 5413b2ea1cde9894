//! Error types for the run loop.

use thiserror::Error;

use crate::state::RunLoopState;

/// Errors that can occur in the RunLoop.
#[derive(Debug, Error)]
pub enum RunLoopError {
    /// RunLoop is already running.
    #[error("RunLoop is already running")]
    AlreadyRunning,

    /// RunLoop has already stopped and cannot be restarted.
    #[error("RunLoop cannot run from state {0}")]
    InvalidState(RunLoopState),

    /// Wakeup channel closed (the loop was dropped).
    #[error("Channel closed")]
    ChannelClosed,

    /// Failed to build the runtime that drives the loop.
    #[error("Failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for RunLoop operations.
pub type RunLoopResult<T> = Result<T, RunLoopError>;
