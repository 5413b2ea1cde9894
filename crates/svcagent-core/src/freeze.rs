//! Freeze/thaw listener.
//!
//! Subscribes to the freeze broadcast at most once and filters notices down
//! to thaws of this process.

use tracing::{debug, info, warn};

use crate::source::{FreezeChannel, FreezeNotice, FreezeSink, FreezeState, FreezeSubscription};

#[derive(Debug)]
pub struct FreezeListener {
    enabled: bool,
    pid: u32,
    token: Option<FreezeSubscription>,
    attempted: bool,
}

impl FreezeListener {
    pub fn new(enabled: bool, pid: u32) -> Self {
        Self {
            enabled,
            pid,
            token: None,
            attempted: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_subscribed(&self) -> bool {
        self.token.is_some()
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Subscribe unless already done or already tried. Failures are logged
    /// and not retried.
    pub fn ensure_subscribed(&mut self, channel: &mut dyn FreezeChannel, sink: FreezeSink) {
        if !self.enabled || self.attempted {
            return;
        }
        self.attempted = true;
        match channel.subscribe(sink) {
            Ok(token) => {
                info!("Freeze: listening for thaw of pid {}", self.pid);
                self.token = Some(token);
            }
            Err(e) => warn!("Freeze: subscription failed: {}", e),
        }
    }

    /// Whether `notice` is a thaw of this process.
    pub fn is_own_thaw(&self, notice: &FreezeNotice) -> bool {
        if !self.enabled {
            return false;
        }
        let own = notice.pid == self.pid && notice.state == FreezeState::Thawed;
        if !own {
            debug!(
                "Freeze: ignoring {:?} for pid {}",
                notice.state, notice.pid
            );
        }
        own
    }
}
