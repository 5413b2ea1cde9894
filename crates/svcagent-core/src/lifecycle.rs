//! Lifecycle state machine.
//!
//! ```text
//! Uninitialized ──create ok──► Created ──Start──► Running
//!       │                         │                  │
//!       └──create failed──────────┴─────terminate────┴──► Dying
//! ```
//!
//! `Dying` is absorbing. `Stopped` is reserved by the launch protocol; no
//! transition enters it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, AgentResult};

/// Lifecycle state of one agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Created,
    Running,
    Stopped,
    Dying,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Dying => write!(f, "dying"),
        }
    }
}

/// Owns the current [`LifecycleState`] and enforces legal transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Check that initialization may start.
    pub fn begin_initialize(&self) -> AgentResult<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(AgentError::AlreadyRunning);
        }
        Ok(())
    }

    /// `Uninitialized → Created`.
    pub fn mark_created(&mut self) -> AgentResult<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(AgentError::InvalidState(self.state));
        }
        self.transition(LifecycleState::Created);
        Ok(())
    }

    /// `Created → Running`. Returns `true` on the first start only; a start
    /// while already running is accepted and leaves the state alone.
    pub fn mark_running(&mut self) -> AgentResult<bool> {
        match self.state {
            LifecycleState::Created => {
                self.transition(LifecycleState::Running);
                Ok(true)
            }
            LifecycleState::Running => Ok(false),
            other => Err(AgentError::InvalidState(other)),
        }
    }

    /// Enter `Dying`. Returns `false` if already dying, so the terminate
    /// sequence runs once.
    pub fn begin_dying(&mut self) -> bool {
        if self.state == LifecycleState::Dying {
            debug!("Lifecycle: already dying");
            return false;
        }
        self.transition(LifecycleState::Dying);
        true
    }

    /// Whether launch events should still be handled.
    pub fn accepts_events(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Created | LifecycleState::Running
        )
    }

    pub fn is_dying(&self) -> bool {
        self.state == LifecycleState::Dying
    }

    fn transition(&mut self, next: LifecycleState) {
        info!("Lifecycle: {} -> {}", self.state, next);
        self.state = next;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
