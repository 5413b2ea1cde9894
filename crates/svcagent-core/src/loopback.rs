//! In-process collaborators.
//!
//! Each type is a cheap handle over shared state: keep one clone to drive it
//! (publish notices, send launch events) and hand another to the agent.
//! Used by tests and by the demo binary.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::condition::{ConditionNotice, NotificationValue};
use crate::error::{AgentError, AgentResult, SubscriptionError};
use crate::launch::{AppStatus, LaunchEvent, LaunchSink, LaunchTransport};
use crate::locale::LocaleEnv;
use crate::memory::MemoryTrimmer;
use crate::source::{
    ConditionSink, ConditionSource, FreezeChannel, FreezeNotice, FreezeSink, FreezeSubscription,
};

// ============================================================================
// Launch transport
// ============================================================================

#[derive(Default)]
struct LaunchInner {
    sink: Option<LaunchSink>,
    argv: Vec<String>,
    statuses: Vec<AppStatus>,
    no_restart: bool,
    fail_bind: bool,
}

/// Launcher that lives in the same process.
#[derive(Clone, Default)]
pub struct LoopbackLaunchTransport {
    inner: Arc<Mutex<LaunchInner>>,
}

impl LoopbackLaunchTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `bind` fail.
    pub fn fail_bind(&self) {
        self.inner.lock().fail_bind = true;
    }

    /// Deliver a launch event. Returns `false` if not bound or the agent's
    /// loop is gone.
    pub fn send(&self, event: LaunchEvent) -> bool {
        let inner = self.inner.lock();
        match inner.sink.as_ref() {
            Some(sink) => sink.deliver(event).is_ok(),
            None => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().sink.is_some()
    }

    pub fn bound_argv(&self) -> Vec<String> {
        self.inner.lock().argv.clone()
    }

    /// Statuses reported so far, oldest first.
    pub fn statuses(&self) -> Vec<AppStatus> {
        self.inner.lock().statuses.clone()
    }

    pub fn no_restart_requested(&self) -> bool {
        self.inner.lock().no_restart
    }
}

impl LaunchTransport for LoopbackLaunchTransport {
    fn bind(&mut self, argv: &[String], sink: LaunchSink) -> Result<(), SubscriptionError> {
        let mut inner = self.inner.lock();
        if inner.fail_bind {
            return Err(SubscriptionError::Unavailable("launcher".to_string()));
        }
        inner.argv = argv.to_vec();
        inner.sink = Some(sink);
        debug!("Loopback: launch transport bound ({} args)", argv.len());
        Ok(())
    }

    fn update_status(&mut self, status: AppStatus) -> Result<(), SubscriptionError> {
        self.inner.lock().statuses.push(status);
        Ok(())
    }

    fn inform_no_restart(&mut self) -> Result<(), SubscriptionError> {
        self.inner.lock().no_restart = true;
        Ok(())
    }
}

// ============================================================================
// Condition source
// ============================================================================

#[derive(Default)]
struct ConditionInner {
    values: HashMap<String, NotificationValue>,
    sinks: HashMap<String, ConditionSink>,
    failing: HashSet<String>,
    subscribe_calls: usize,
}

/// Key-value store that notifies subscribers on change.
#[derive(Clone, Default)]
pub struct LoopbackConditionSource {
    inner: Arc<Mutex<ConditionInner>>,
}

impl LoopbackConditionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value without notifying anyone.
    pub fn set_value(&self, key: impl Into<String>, value: NotificationValue) {
        self.inner.lock().values.insert(key.into(), value);
    }

    /// Store a value and notify the subscriber of `key`, if any. Returns
    /// whether a notice was delivered.
    pub fn publish(&self, key: &str, value: NotificationValue) -> bool {
        let mut inner = self.inner.lock();
        inner.values.insert(key.to_string(), value.clone());
        match inner.sinks.get(key) {
            Some(sink) => sink.deliver(ConditionNotice::new(key, value)).is_ok(),
            None => false,
        }
    }

    /// Reject future subscriptions of `key`.
    pub fn fail_subscribe(&self, key: impl Into<String>) {
        self.inner.lock().failing.insert(key.into());
    }

    pub fn is_subscribed(&self, key: &str) -> bool {
        self.inner.lock().sinks.contains_key(key)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    /// Total `subscribe` calls, successful or not.
    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().subscribe_calls
    }
}

impl ConditionSource for LoopbackConditionSource {
    fn subscribe(&mut self, key: &str, sink: ConditionSink) -> Result<(), SubscriptionError> {
        let mut inner = self.inner.lock();
        inner.subscribe_calls += 1;
        if inner.failing.contains(key) {
            return Err(SubscriptionError::Rejected(key.to_string()));
        }
        inner.sinks.insert(key.to_string(), sink);
        Ok(())
    }

    fn unsubscribe(&mut self, key: &str) -> Result<(), SubscriptionError> {
        match self.inner.lock().sinks.remove(key) {
            Some(_) => Ok(()),
            None => Err(SubscriptionError::NotSubscribed(key.to_string())),
        }
    }

    fn read(&self, key: &str) -> Option<NotificationValue> {
        self.inner.lock().values.get(key).cloned()
    }
}

// ============================================================================
// Freeze channel
// ============================================================================

#[derive(Default)]
struct FreezeInner {
    sink: Option<FreezeSink>,
    subscribe_calls: usize,
    fail: bool,
}

/// Freeze broadcast confined to this process.
#[derive(Clone, Default)]
pub struct LoopbackFreezeChannel {
    inner: Arc<Mutex<FreezeInner>>,
}

impl LoopbackFreezeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject future subscriptions.
    pub fn fail_subscribe(&self) {
        self.inner.lock().fail = true;
    }

    /// Broadcast a notice. Returns whether a subscriber received it.
    pub fn broadcast(&self, notice: FreezeNotice) -> bool {
        let inner = self.inner.lock();
        match inner.sink.as_ref() {
            Some(sink) => sink.deliver(notice).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().sink.is_some()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().subscribe_calls
    }
}

impl FreezeChannel for LoopbackFreezeChannel {
    fn subscribe(&mut self, sink: FreezeSink) -> Result<FreezeSubscription, SubscriptionError> {
        let mut inner = self.inner.lock();
        inner.subscribe_calls += 1;
        if inner.fail {
            return Err(SubscriptionError::Unavailable("freeze broadcast".to_string()));
        }
        inner.sink = Some(sink);
        Ok(FreezeSubscription(inner.subscribe_calls as u64))
    }
}

// ============================================================================
// Locale and memory
// ============================================================================

#[derive(Default)]
struct LocaleInner {
    languages: Vec<String>,
    regions: Vec<String>,
    fail: bool,
}

/// Records locale changes instead of touching the process environment.
#[derive(Clone, Default)]
pub struct RecordingLocale {
    inner: Arc<Mutex<LocaleInner>>,
}

impl RecordingLocale {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future apply fail.
    pub fn fail(&self) {
        self.inner.lock().fail = true;
    }

    pub fn languages(&self) -> Vec<String> {
        self.inner.lock().languages.clone()
    }

    pub fn regions(&self) -> Vec<String> {
        self.inner.lock().regions.clone()
    }
}

impl LocaleEnv for RecordingLocale {
    fn apply_language(&mut self, language: &str) -> AgentResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(AgentError::InvalidArgument(language.to_string()));
        }
        inner.languages.push(language.to_string());
        Ok(())
    }

    fn apply_region(&mut self, region: &str) -> AgentResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(AgentError::InvalidArgument(region.to_string()));
        }
        inner.regions.push(region.to_string());
        Ok(())
    }
}

/// Counts trims instead of trimming.
#[derive(Clone, Default)]
pub struct CountingTrimmer {
    count: Arc<AtomicUsize>,
}

impl CountingTrimmer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl MemoryTrimmer for CountingTrimmer {
    fn trim(&mut self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
