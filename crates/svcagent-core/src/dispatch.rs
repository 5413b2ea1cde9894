//! Dispatch core.
//!
//! [`AgentCore`] is the run loop's event handler. Every launch event,
//! condition notice, freeze notice, exit request and timer fire arrives here
//! on the loop thread and is routed to the lifecycle, the suspend
//! coordinator, the registry and the application's callbacks.

use tracing::{debug, info, warn};

use svcagent_runloop::{EventHandler, LoopContext, LoopEvent, LoopHandle, TimerId};

use crate::app::{AppContext, LifecycleCallbacks};
use crate::condition::{ConditionKind, ConditionNotice, ConditionValue, NotificationValue, SuspendedState};
use crate::config::LowMemoryPost;
use crate::freeze::FreezeListener;
use crate::launch::{AppStatus, LaunchEvent, LaunchEventKind, LaunchTransport};
use crate::lifecycle::Lifecycle;
use crate::locale::LocaleEnv;
use crate::memory::MemoryFlush;
use crate::registry::{ConditionHooks, ConditionRegistry};
use crate::source::{ConditionSink, ConditionSource, FreezeChannel, FreezeNotice, FreezeSink};
use crate::suspend::SuspendCoordinator;

/// Message posted into the agent's run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Launch-protocol event.
    Launch(LaunchEvent),
    /// Condition source notice.
    Condition(ConditionNotice),
    /// Freeze broadcast notice.
    Freeze(FreezeNotice),
    /// Self-termination request.
    Exit { no_restart: bool },
    /// Subscribe to the freeze broadcast (deferred to the first idle tick).
    SubscribeFreeze,
}

impl CoreEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreEvent::Launch(_) => "launch",
            CoreEvent::Condition(_) => "condition",
            CoreEvent::Freeze(_) => "freeze",
            CoreEvent::Exit { .. } => "exit",
            CoreEvent::SubscribeFreeze => "subscribe_freeze",
        }
    }
}

/// Locale and memory side effects around condition dispatch.
pub(crate) struct ConditionEffects {
    pub(crate) locale: Box<dyn LocaleEnv>,
    pub(crate) memory: MemoryFlush,
    pub(crate) low_memory_post: LowMemoryPost,
    pub(crate) post_hook: Option<Box<dyn FnMut()>>,
}

impl ConditionHooks for ConditionEffects {
    fn before_dispatch(&mut self, kind: ConditionKind, value: &NotificationValue) {
        let result = match (kind, value.as_text()) {
            (ConditionKind::LanguageChanged, Some(language)) => self.locale.apply_language(language),
            (ConditionKind::RegionChanged, Some(region)) => self.locale.apply_region(region),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Locale update for {} failed: {}", kind, e);
        }
    }

    fn after_dispatch(&mut self, kind: ConditionKind, _value: &NotificationValue) {
        if kind != ConditionKind::LowMemory {
            return;
        }
        match (self.low_memory_post, self.post_hook.as_mut()) {
            (LowMemoryPost::Notify, Some(hook)) => hook(),
            _ => self.memory.trim(),
        }
    }
}

/// Collaborators and state driven by the run loop.
pub(crate) struct AgentCore {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) registry: ConditionRegistry,
    pub(crate) suspend: SuspendCoordinator,
    pub(crate) freeze: FreezeListener,
    pub(crate) effects: ConditionEffects,
    pub(crate) callbacks: LifecycleCallbacks,
    pub(crate) transport: Box<dyn LaunchTransport>,
    pub(crate) source: Box<dyn ConditionSource>,
    pub(crate) freeze_channel: Option<Box<dyn FreezeChannel>>,
    pub(crate) handle: LoopHandle<CoreEvent>,
}

impl AgentCore {
    pub(crate) fn condition_sink(&self) -> ConditionSink {
        ConditionSink::new(self.handle.clone())
    }

    /// Build an [`AppContext`] and hand it to `f` alongside the callbacks.
    pub(crate) fn with_app_context<R>(
        &mut self,
        f: impl FnOnce(&mut LifecycleCallbacks, &mut AppContext<'_>) -> R,
    ) -> R {
        let Self {
            callbacks,
            registry,
            source,
            handle,
            ..
        } = self;
        let mut cx = AppContext::new(registry, source.as_mut(), handle);
        f(callbacks, &mut cx)
    }

    fn handle_event(&mut self, cx: &mut LoopContext<'_, CoreEvent>, event: CoreEvent) {
        debug!("Dispatch: {}", event.kind());
        match event {
            CoreEvent::Launch(launch) => self.handle_launch(cx, launch),
            CoreEvent::Condition(notice) => {
                if self.lifecycle.is_dying() {
                    debug!("Dispatch: dropping condition '{}' while dying", notice.key);
                    return;
                }
                self.registry.dispatch(&notice, &mut self.effects);
            }
            CoreEvent::Freeze(notice) => {
                if !self.lifecycle.accepts_events() || !self.freeze.is_own_thaw(&notice) {
                    return;
                }
                if let Some(state) = self.suspend.on_thaw(cx) {
                    self.notify_suspended(state);
                }
            }
            CoreEvent::Exit { no_restart } => self.terminate(cx, no_restart),
            CoreEvent::SubscribeFreeze => {
                if self.lifecycle.is_dying() {
                    return;
                }
                let sink = FreezeSink::new(self.handle.clone());
                if let Some(channel) = self.freeze_channel.as_mut() {
                    self.freeze.ensure_subscribed(channel.as_mut(), sink);
                }
            }
        }
    }

    fn handle_launch(&mut self, cx: &mut LoopContext<'_, CoreEvent>, event: LaunchEvent) {
        if !self.lifecycle.accepts_events() {
            debug!(
                "Dispatch: dropping {} in state {}",
                event.kind,
                self.lifecycle.state()
            );
            return;
        }

        match event.kind {
            LaunchEventKind::Start => {
                if event.bundle.background_allowed() {
                    if let Some(state) = self.suspend.allow_background(cx) {
                        self.notify_suspended(state);
                    }
                }
                self.with_app_context(|callbacks, app| {
                    if let Some(on_app_control) = callbacks.app_control.as_mut() {
                        on_app_control(app, &event.bundle);
                    }
                });
                match self.lifecycle.mark_running() {
                    Ok(true) => {
                        if let Err(e) = self.transport.update_status(AppStatus::Running) {
                            warn!("Dispatch: status update failed: {}", e);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Dispatch: start rejected: {}", e),
                }
            }
            LaunchEventKind::Resume => {
                if event.bundle.background_allowed() {
                    if let Some(state) = self.suspend.allow_background(cx) {
                        self.notify_suspended(state);
                    }
                }
            }
            LaunchEventKind::Suspend => {
                self.suspend.on_suspend(cx);
            }
            LaunchEventKind::Wake => {
                if let Some(state) = self.suspend.on_wake(cx) {
                    self.notify_suspended(state);
                }
            }
            LaunchEventKind::Terminate | LaunchEventKind::TerminateBackgroundApp => {
                self.terminate(cx, false);
            }
        }
    }

    fn handle_timer(&mut self, id: TimerId) {
        if let Some(state) = self.suspend.on_timer(id, &mut self.effects.memory) {
            self.notify_suspended(state);
        }
    }

    fn notify_suspended(&mut self, state: SuspendedState) {
        self.registry.notify_internal(
            ConditionKind::SuspendedStateChanged,
            ConditionValue::Suspended(state),
        );
    }

    /// Run the terminate sequence once and stop the loop.
    pub(crate) fn terminate(&mut self, cx: &mut LoopContext<'_, CoreEvent>, no_restart: bool) {
        if !self.lifecycle.begin_dying() {
            return;
        }
        self.suspend.on_terminate(cx);

        if let Err(e) = self.transport.update_status(AppStatus::Dying) {
            warn!("Dispatch: status update failed: {}", e);
        }
        if no_restart {
            if let Err(e) = self.transport.inform_no_restart() {
                warn!("Dispatch: no-restart request failed: {}", e);
            }
        }

        if let Some(mut on_terminate) = self.callbacks.terminate.take() {
            on_terminate();
        }

        self.registry.release_all(self.source.as_mut());
        cx.stop();
        info!("Agent terminated");
    }
}

impl EventHandler<CoreEvent> for AgentCore {
    fn on_event(&mut self, cx: &mut LoopContext<'_, CoreEvent>, event: LoopEvent<CoreEvent>) {
        match event {
            LoopEvent::Message(event) | LoopEvent::Idle(event) => self.handle_event(cx, event),
            LoopEvent::Timer(id) => self.handle_timer(id),
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
