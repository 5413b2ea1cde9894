//! RunLoop state definitions.

/// Where a [`RunLoop`](crate::RunLoop) is in its single `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunLoopState {
    /// Not started.
    Created,
    /// Draining messages or timers.
    Running,
    /// Parked until a wakeup or the next timer deadline.
    Waiting,
    Stopping,
    /// `run` returned; the loop cannot be restarted.
    Stopped,
}

impl std::fmt::Display for RunLoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunLoopState::Created => write!(f, "created"),
            RunLoopState::Running => write!(f, "running"),
            RunLoopState::Waiting => write!(f, "waiting"),
            RunLoopState::Stopping => write!(f, "stopping"),
            RunLoopState::Stopped => write!(f, "stopped"),
        }
    }
}

impl RunLoopState {
    /// Whether the loop is currently inside `run`.
    pub fn is_active(&self) -> bool {
        matches!(self, RunLoopState::Running | RunLoopState::Waiting)
    }
}

/// Why a call to `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLoopRunResult {
    /// A handler asked the loop to stop.
    Stopped,
    /// A `Stop` wakeup arrived through a handle.
    StoppedExternally,
}
