//! Seams to the external condition source and freeze broadcast.
//!
//! Both deliver into the agent's loop through a sink holding a loop handle;
//! implementations may call the sink from any thread.

use serde::{Deserialize, Serialize};

use svcagent_runloop::{LoopHandle, RunLoopResult};

use crate::condition::{ConditionNotice, NotificationValue};
use crate::dispatch::CoreEvent;
use crate::error::SubscriptionError;

/// Posts condition notices into the agent's loop.
#[derive(Debug, Clone)]
pub struct ConditionSink {
    handle: LoopHandle<CoreEvent>,
}

impl ConditionSink {
    pub(crate) fn new(handle: LoopHandle<CoreEvent>) -> Self {
        Self { handle }
    }

    pub fn deliver(&self, notice: ConditionNotice) -> RunLoopResult<()> {
        self.handle.post(CoreEvent::Condition(notice))
    }
}

/// Key-value change-notification service.
pub trait ConditionSource {
    /// Start delivering changes of `key` to `sink`.
    fn subscribe(&mut self, key: &str, sink: ConditionSink) -> Result<(), SubscriptionError>;

    /// Stop delivering changes of `key`.
    fn unsubscribe(&mut self, key: &str) -> Result<(), SubscriptionError>;

    /// Current value of `key`, if any.
    fn read(&self, key: &str) -> Option<NotificationValue>;
}

/// OS-level freeze state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeState {
    Frozen,
    Thawed,
}

/// Freeze broadcast notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeNotice {
    pub pid: u32,
    pub state: FreezeState,
}

/// Token proving the freeze channel subscription is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreezeSubscription(pub u64);

/// Posts freeze notices into the agent's loop.
#[derive(Debug, Clone)]
pub struct FreezeSink {
    handle: LoopHandle<CoreEvent>,
}

impl FreezeSink {
    pub(crate) fn new(handle: LoopHandle<CoreEvent>) -> Self {
        Self { handle }
    }

    pub fn deliver(&self, notice: FreezeNotice) -> RunLoopResult<()> {
        self.handle.post(CoreEvent::Freeze(notice))
    }
}

/// Inter-process freeze broadcast channel.
pub trait FreezeChannel {
    fn subscribe(&mut self, sink: FreezeSink) -> Result<FreezeSubscription, SubscriptionError>;
}
