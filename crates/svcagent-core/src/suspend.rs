//! Deferred background-suspend timer.
//!
//! ```text
//!            Suspend                 timer fires
//!  Active ─────────────► TimerArmed ─────────────► Suspended
//!    ▲                      │                          │
//!    └──────── Wake ────────┴────────── Wake ──────────┘
//! ```
//!
//! Once the launcher grants the background exemption no timer is ever armed
//! again.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use svcagent_runloop::{TimerControl, TimerId};

use crate::condition::SuspendedState;
use crate::memory::MemoryFlush;

/// Observable coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendState {
    Active,
    TimerArmed,
    Suspended,
}

impl fmt::Display for SuspendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuspendState::Active => write!(f, "active"),
            SuspendState::TimerArmed => write!(f, "timer_armed"),
            SuspendState::Suspended => write!(f, "suspended"),
        }
    }
}

#[derive(Debug)]
pub struct SuspendCoordinator {
    delay: Duration,
    timer: Option<TimerId>,
    suspended: bool,
    background_allowed: bool,
}

impl SuspendCoordinator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: None,
            suspended: false,
            background_allowed: false,
        }
    }

    pub fn state(&self) -> SuspendState {
        if self.suspended {
            SuspendState::Suspended
        } else if self.timer.is_some() {
            SuspendState::TimerArmed
        } else {
            SuspendState::Active
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_background_allowed(&self) -> bool {
        self.background_allowed
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Handle a suspend request. Returns whether a timer was armed.
    pub fn on_suspend(&mut self, timers: &mut dyn TimerControl) -> bool {
        if self.background_allowed || self.state() != SuspendState::Active {
            debug!("Suspend: request ignored in state {}", self.state());
            return false;
        }
        let id = timers.arm_timer(self.delay);
        debug!("Suspend: armed {} for {:?}", id, self.delay);
        self.timer = Some(id);
        true
    }

    /// Handle a timer fire. Ids other than the pending one are stale and
    /// ignored. Returns the transition to report, if any.
    pub fn on_timer(&mut self, id: TimerId, memory: &mut MemoryFlush) -> Option<SuspendedState> {
        if self.timer != Some(id) {
            debug!("Suspend: ignoring stale {}", id);
            return None;
        }
        self.timer = None;
        memory.flush();
        self.suspended = true;
        info!("Suspend: entered background suspend");
        Some(SuspendedState::WillEnterSuspend)
    }

    /// Handle a wake request. Returns the transition to report, if any.
    pub fn on_wake(&mut self, timers: &mut dyn TimerControl) -> Option<SuspendedState> {
        self.cancel(timers);
        if !self.suspended {
            return None;
        }
        self.suspended = false;
        info!("Suspend: left background suspend");
        Some(SuspendedState::DidExitFromSuspend)
    }

    /// Grant the background exemption for the rest of the process lifetime.
    /// A suspended process leaves suspend through the wake path; the wake
    /// transition is returned for reporting.
    pub fn allow_background(&mut self, timers: &mut dyn TimerControl) -> Option<SuspendedState> {
        if !self.background_allowed {
            info!("Suspend: background execution allowed");
        }
        self.background_allowed = true;
        self.on_wake(timers)
    }

    /// Cancel any pending timer ahead of termination.
    pub fn on_terminate(&mut self, timers: &mut dyn TimerControl) {
        self.cancel(timers);
    }

    /// Handle a thaw of this process: wake, then re-arm. Returns the wake
    /// transition to report, if any.
    pub fn on_thaw(&mut self, timers: &mut dyn TimerControl) -> Option<SuspendedState> {
        if self.background_allowed || !self.suspended {
            debug!("Suspend: thaw ignored in state {}", self.state());
            return None;
        }
        let woke = self.on_wake(timers);
        self.on_suspend(timers);
        woke
    }

    fn cancel(&mut self, timers: &mut dyn TimerControl) {
        if let Some(id) = self.timer.take() {
            timers.cancel_timer(id);
            debug!("Suspend: cancelled {}", id);
        }
    }
}
