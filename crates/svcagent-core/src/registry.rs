//! Condition subscription registry.
//!
//! One entry per [`ConditionKind`]. The external subscription for a kind is
//! live exactly while an application callback is set for it and the source
//! accepted the subscription.

use tracing::{debug, warn};

use crate::condition::{ConditionEvent, ConditionKind, ConditionNotice, ConditionValue, NotificationValue};
use crate::error::AgentError;
use crate::source::{ConditionSink, ConditionSource};

/// Application callback for one condition kind. Captured state is the
/// callback's user data.
pub type ConditionCallback = Box<dyn FnMut(&ConditionEvent)>;

/// Side effects run around a dispatched notice, with or without a callback.
pub trait ConditionHooks {
    /// Runs before the callback.
    fn before_dispatch(&mut self, kind: ConditionKind, value: &NotificationValue);

    /// Runs after the callback.
    fn after_dispatch(&mut self, kind: ConditionKind, value: &NotificationValue);
}

struct Entry {
    kind: ConditionKind,
    callback: Option<ConditionCallback>,
    subscribed: bool,
}

/// Outcome of dispatching one notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No kind watches the notice key.
    UnknownKey,
    /// Below threshold or malformed; hooks ran, callback did not.
    Filtered,
    /// Decoded, but no callback is registered.
    NoCallback,
    /// The callback ran.
    Delivered,
}

/// Fixed table of condition subscriptions.
pub struct ConditionRegistry {
    entries: Vec<Entry>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self {
            entries: ConditionKind::ALL
                .into_iter()
                .map(|kind| Entry {
                    kind,
                    callback: None,
                    subscribed: false,
                })
                .collect(),
        }
    }

    fn entry_mut(&mut self, kind: ConditionKind) -> &mut Entry {
        &mut self.entries[kind.index()]
    }

    /// Set or clear the callback for `kind`, subscribing or unsubscribing
    /// externally as needed.
    ///
    /// A failed subscription is logged; the callback is kept and the entry
    /// stays unsubscribed.
    pub fn set_callback(
        &mut self,
        kind: ConditionKind,
        callback: Option<ConditionCallback>,
        source: &mut dyn ConditionSource,
        sink: &ConditionSink,
    ) {
        let entry = self.entry_mut(kind);
        let wants = callback.is_some();
        entry.callback = callback;

        match (wants, entry.subscribed) {
            (true, false) => match kind.external_key() {
                Some(key) => match source.subscribe(key, sink.clone()) {
                    Ok(()) => {
                        debug!("Registry: subscribed {} ({})", kind, key);
                        entry.subscribed = true;
                    }
                    Err(e) => {
                        let err = AgentError::ExternalSubscriptionFailed {
                            key: key.to_string(),
                            reason: e.to_string(),
                        };
                        warn!("Registry: {} [{}]", err, err.name());
                    }
                },
                None => entry.subscribed = true,
            },
            (false, true) => {
                if let Some(key) = kind.external_key() {
                    if let Err(e) = source.unsubscribe(key) {
                        warn!("Registry: unsubscribe {} failed: {}", key, e);
                    } else {
                        debug!("Registry: unsubscribed {} ({})", kind, key);
                    }
                }
                entry.subscribed = false;
            }
            _ => {}
        }
    }

    /// [`set_callback`](Self::set_callback) by kind name.
    pub fn set_callback_by_name(
        &mut self,
        name: &str,
        callback: Option<ConditionCallback>,
        source: &mut dyn ConditionSource,
        sink: &ConditionSink,
    ) -> Result<(), AgentError> {
        let kind: ConditionKind = name.parse()?;
        self.set_callback(kind, callback, source, sink);
        Ok(())
    }

    pub fn has_callback(&self, kind: ConditionKind) -> bool {
        self.entries[kind.index()].callback.is_some()
    }

    pub fn is_subscribed(&self, kind: ConditionKind) -> bool {
        self.entries[kind.index()].subscribed
    }

    /// Route a notice from the condition source.
    pub fn dispatch(
        &mut self,
        notice: &ConditionNotice,
        hooks: &mut dyn ConditionHooks,
    ) -> DispatchOutcome {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.kind.external_key() == Some(notice.key.as_str()))
        else {
            debug!("Registry: no kind watches '{}'", notice.key);
            return DispatchOutcome::UnknownKey;
        };
        let kind = entry.kind;

        hooks.before_dispatch(kind, &notice.value);

        let outcome = match ConditionEvent::decode(kind, &notice.value) {
            None => DispatchOutcome::Filtered,
            Some(event) => match entry.callback.as_mut() {
                Some(callback) => {
                    callback(&event);
                    DispatchOutcome::Delivered
                }
                None => DispatchOutcome::NoCallback,
            },
        };
        debug!("Registry: {} -> {:?}", kind, outcome);

        hooks.after_dispatch(kind, &notice.value);
        outcome
    }

    /// Deliver an internally produced value. Returns whether a callback ran.
    pub fn notify_internal(&mut self, kind: ConditionKind, value: ConditionValue) -> bool {
        let entry = self.entry_mut(kind);
        match entry.callback.as_mut() {
            Some(callback) => {
                callback(&ConditionEvent { kind, value });
                true
            }
            None => false,
        }
    }

    /// Drop every callback and external subscription.
    pub fn release_all(&mut self, source: &mut dyn ConditionSource) {
        for entry in &mut self.entries {
            if entry.subscribed {
                if let Some(key) = entry.kind.external_key() {
                    if let Err(e) = source.unsubscribe(key) {
                        warn!("Registry: unsubscribe {} failed: {}", key, e);
                    }
                }
            }
            entry.subscribed = false;
            entry.callback = None;
        }
        debug!("Registry: released all subscriptions");
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for entry in &self.entries {
            list.entry(&(entry.kind, entry.callback.is_some(), entry.subscribed));
        }
        list.finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
