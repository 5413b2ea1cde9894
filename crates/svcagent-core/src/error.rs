//! Agent-related errors.

use thiserror::Error;

use svcagent_runloop::RunLoopError;

use crate::lifecycle::LifecycleState;

/// Errors surfaced by the agent's public surface.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing required callback or malformed argv.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The agent was initialized twice.
    #[error("Agent is already running")]
    AlreadyRunning,

    /// Locale setup, launch-protocol binding or the create callback failed.
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Condition kind not recognized.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Subscribing to an external condition source failed.
    #[error("Subscription to '{key}' failed: {reason}")]
    ExternalSubscriptionFailed { key: String, reason: String },

    /// Operation not allowed in the current lifecycle state.
    #[error("Operation not allowed in state {0}")]
    InvalidState(LifecycleState),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run loop error.
    #[error("RunLoop error: {0}")]
    RunLoop(#[from] RunLoopError),
}

impl AgentError {
    /// Negative status code returned by `main_entry`.
    pub fn code(&self) -> i32 {
        match self {
            AgentError::InvalidArgument(_) => -libc::EINVAL,
            AgentError::AlreadyRunning => -libc::EALREADY,
            AgentError::InitializationFailed(_) => -libc::ECANCELED,
            AgentError::UnknownEvent(_) => -libc::EINVAL,
            AgentError::ExternalSubscriptionFailed { .. } => -libc::EIO,
            AgentError::InvalidState(_) => -libc::EPERM,
            AgentError::Config(_) => -libc::EINVAL,
            AgentError::RunLoop(_) => -libc::EIO,
        }
    }

    /// Stable upper-case name used in error logs.
    pub fn name(&self) -> &'static str {
        match self {
            AgentError::InvalidArgument(_) => "INVALID_PARAMETER",
            AgentError::AlreadyRunning => "ALREADY_RUNNING",
            AgentError::InitializationFailed(_) => "INITIALIZATION_FAILED",
            AgentError::UnknownEvent(_) => "UNKNOWN_EVENT",
            AgentError::ExternalSubscriptionFailed { .. } => "SUBSCRIPTION_FAILED",
            AgentError::InvalidState(_) => "INVALID_CONTEXT",
            AgentError::Config(_) => "INVALID_CONFIG",
            AgentError::RunLoop(_) => "RUNLOOP",
        }
    }
}

/// Failure reported by an external collaborator (condition source, freeze
/// channel, launch transport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The service refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The service is not reachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The key is not subscribed.
    #[error("not subscribed: {0}")]
    NotSubscribed(String),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error while reading the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// `${VAR}` referenced an unset environment variable.
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// Semantic validation failed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
