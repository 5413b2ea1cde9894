//! Public control surface.
//!
//! A [`ServiceAgent`] owns the run loop and every collaborator. The
//! application hands it a set of [`LifecycleCallbacks`]; the agent binds to
//! the launcher, runs `create`, and then drives everything from the loop
//! until a terminate arrives.
//!
//! ```rust,no_run
//! use svcagent_core::{
//!     ConditionKind, LifecycleCallbacks, LoopbackConditionSource, LoopbackLaunchTransport,
//!     ServiceAgent,
//! };
//!
//! let mut agent = ServiceAgent::builder()
//!     .transport(LoopbackLaunchTransport::new())
//!     .condition_source(LoopbackConditionSource::new())
//!     .build()
//!     .unwrap();
//!
//! let callbacks = LifecycleCallbacks::new()
//!     .on_create(|cx| {
//!         cx.on_condition(ConditionKind::LowMemory, |event| println!("{:?}", event));
//!         true
//!     })
//!     .on_terminate(|| println!("bye"));
//!
//! let code = agent.main_entry(&["my-service".to_string()], callbacks);
//! std::process::exit(code);
//! ```

use tracing::{debug, error, info, warn};

use svcagent_runloop::{LoopHandle, RunLoop, RunLoopResult, RunLoopRunResult};

use crate::condition::{ConditionEvent, ConditionKind, NotificationValue};
use crate::config::AgentConfig;
use crate::dispatch::{AgentCore, ConditionEffects, CoreEvent};
use crate::error::{AgentError, AgentResult};
use crate::freeze::FreezeListener;
use crate::launch::{Bundle, LaunchSink, LaunchTransport};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::locale::{LocaleEnv, ProcessLocale};
use crate::memory::MemoryFlush;
use crate::registry::{ConditionCallback, ConditionRegistry};
use crate::source::{ConditionSink, ConditionSource, FreezeChannel};
use crate::suspend::{SuspendCoordinator, SuspendState};

/// Create callback. Returning `false` aborts initialization.
pub type CreateCallback = Box<dyn FnMut(&mut AppContext<'_>) -> bool>;

/// App-control (request handling) callback, run on every `Start`.
pub type AppControlCallback = Box<dyn FnMut(&mut AppContext<'_>, &Bundle)>;

/// Callback without arguments (terminate, low-memory post).
pub type HookCallback = Box<dyn FnMut()>;

/// Application lifecycle callbacks.
#[derive(Default)]
pub struct LifecycleCallbacks {
    pub(crate) create: Option<CreateCallback>,
    pub(crate) terminate: Option<HookCallback>,
    pub(crate) app_control: Option<AppControlCallback>,
    pub(crate) low_memory_post: Option<HookCallback>,
}

impl LifecycleCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Required.
    pub fn on_create(mut self, f: impl FnMut(&mut AppContext<'_>) -> bool + 'static) -> Self {
        self.create = Some(Box::new(f));
        self
    }

    /// Runs exactly once when the agent terminates.
    pub fn on_terminate(mut self, f: impl FnMut() + 'static) -> Self {
        self.terminate = Some(Box::new(f));
        self
    }

    pub fn on_app_control(mut self, f: impl FnMut(&mut AppContext<'_>, &Bundle) + 'static) -> Self {
        self.app_control = Some(Box::new(f));
        self
    }

    /// Runs after low-memory notices when `conditions.low_memory_post` is
    /// `notify`.
    pub fn on_low_memory_post(mut self, f: impl FnMut() + 'static) -> Self {
        self.low_memory_post = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for LifecycleCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCallbacks")
            .field("create", &self.create.is_some())
            .field("terminate", &self.terminate.is_some())
            .field("app_control", &self.app_control.is_some())
            .field("low_memory_post", &self.low_memory_post.is_some())
            .finish()
    }
}

/// What lifecycle callbacks may do to the agent.
pub struct AppContext<'a> {
    registry: &'a mut ConditionRegistry,
    source: &'a mut dyn ConditionSource,
    handle: &'a LoopHandle<CoreEvent>,
}

impl<'a> AppContext<'a> {
    pub(crate) fn new(
        registry: &'a mut ConditionRegistry,
        source: &'a mut dyn ConditionSource,
        handle: &'a LoopHandle<CoreEvent>,
    ) -> Self {
        Self {
            registry,
            source,
            handle,
        }
    }

    /// Set or clear the callback for a condition kind.
    pub fn set_condition_callback(&mut self, kind: ConditionKind, callback: Option<ConditionCallback>) {
        let sink = ConditionSink::new(self.handle.clone());
        self.registry
            .set_callback(kind, callback, &mut *self.source, &sink);
    }

    /// Same as [`set_condition_callback`](Self::set_condition_callback), by
    /// kind name.
    pub fn set_condition_callback_by_name(
        &mut self,
        name: &str,
        callback: Option<ConditionCallback>,
    ) -> AgentResult<()> {
        let sink = ConditionSink::new(self.handle.clone());
        self.registry
            .set_callback_by_name(name, callback, &mut *self.source, &sink)
    }

    pub fn on_condition(&mut self, kind: ConditionKind, f: impl FnMut(&ConditionEvent) + 'static) {
        self.set_condition_callback(kind, Some(Box::new(f)));
    }

    pub fn is_subscribed(&self, kind: ConditionKind) -> bool {
        self.registry.is_subscribed(kind)
    }

    /// Terminate after the current callback returns.
    pub fn request_exit(&self) -> AgentResult<()> {
        post_exit(self.handle, false)
    }

    /// Terminate and tell the supervisor not to restart the process.
    pub fn request_exit_no_restart(&self) -> AgentResult<()> {
        post_exit(self.handle, true)
    }

    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            handle: self.handle.clone(),
        }
    }
}

fn post_exit(handle: &LoopHandle<CoreEvent>, no_restart: bool) -> AgentResult<()> {
    handle.post(CoreEvent::Exit { no_restart })?;
    debug!("Exit requested (no_restart={})", no_restart);
    Ok(())
}

/// Requests termination from any thread.
#[derive(Debug, Clone)]
pub struct ExitHandle {
    handle: LoopHandle<CoreEvent>,
}

impl ExitHandle {
    pub fn request_exit(&self) -> AgentResult<()> {
        post_exit(&self.handle, false)
    }

    pub fn request_exit_no_restart(&self) -> AgentResult<()> {
        post_exit(&self.handle, true)
    }
}

/// Builder for [`ServiceAgent`].
pub struct ServiceAgentBuilder {
    config: AgentConfig,
    transport: Option<Box<dyn LaunchTransport>>,
    source: Option<Box<dyn ConditionSource>>,
    freeze_channel: Option<Box<dyn FreezeChannel>>,
    locale: Option<Box<dyn LocaleEnv>>,
    memory: Option<MemoryFlush>,
    pid: Option<u32>,
}

impl ServiceAgentBuilder {
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
            transport: None,
            source: None,
            freeze_channel: None,
            locale: None,
            memory: None,
            pid: None,
        }
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Required.
    pub fn transport(mut self, transport: impl LaunchTransport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Required.
    pub fn condition_source(mut self, source: impl ConditionSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Without a channel the freeze listener stays off.
    pub fn freeze_channel(mut self, channel: impl FreezeChannel + 'static) -> Self {
        self.freeze_channel = Some(Box::new(channel));
        self
    }

    /// Defaults to [`ProcessLocale`].
    pub fn locale(mut self, locale: impl LocaleEnv + 'static) -> Self {
        self.locale = Some(Box::new(locale));
        self
    }

    /// Defaults to an allocator trim without a native hook.
    pub fn memory(mut self, memory: MemoryFlush) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Pid matched against freeze notices. Defaults to the current process.
    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn build(self) -> AgentResult<ServiceAgent> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| AgentError::InvalidArgument("launch transport is required".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| AgentError::InvalidArgument("condition source is required".to_string()))?;

        let run_loop = RunLoop::new(self.config.run_loop.clone());
        let pid = self.pid.unwrap_or_else(std::process::id);
        let freeze_enabled = self.config.freeze.enabled && self.freeze_channel.is_some();

        let core = AgentCore {
            lifecycle: Lifecycle::new(),
            registry: ConditionRegistry::new(),
            suspend: SuspendCoordinator::new(self.config.suspend.delay()),
            freeze: FreezeListener::new(freeze_enabled, pid),
            effects: ConditionEffects {
                locale: self.locale.unwrap_or_else(|| Box::new(ProcessLocale::new())),
                memory: self.memory.unwrap_or_default(),
                low_memory_post: self.config.conditions.low_memory_post,
                post_hook: None,
            },
            callbacks: LifecycleCallbacks::default(),
            transport,
            source,
            freeze_channel: self.freeze_channel,
            handle: run_loop.handle(),
        };

        Ok(ServiceAgent {
            config: self.config,
            run_loop,
            core,
        })
    }
}

impl Default for ServiceAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle and background-suspend coordinator for one service process.
pub struct ServiceAgent {
    config: AgentConfig,
    run_loop: RunLoop<CoreEvent>,
    core: AgentCore,
}

impl ServiceAgent {
    pub fn builder() -> ServiceAgentBuilder {
        ServiceAgentBuilder::new()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.core.lifecycle.state()
    }

    pub fn suspend_state(&self) -> SuspendState {
        self.core.suspend.state()
    }

    pub fn is_background_allowed(&self) -> bool {
        self.core.suspend.is_background_allowed()
    }

    pub fn is_freeze_subscribed(&self) -> bool {
        self.core.freeze.is_subscribed()
    }

    pub fn is_subscribed(&self, kind: ConditionKind) -> bool {
        self.core.registry.is_subscribed(kind)
    }

    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle {
            handle: self.run_loop.handle(),
        }
    }

    /// Bind to the launcher, apply the current locale and run `create`.
    pub fn initialize(&mut self, callbacks: LifecycleCallbacks, argv: &[String]) -> AgentResult<()> {
        self.core.lifecycle.begin_initialize()?;
        if callbacks.create.is_none() {
            return Err(AgentError::InvalidArgument(
                "create callback is required".to_string(),
            ));
        }
        if argv.is_empty() {
            return Err(AgentError::InvalidArgument(
                "argv must contain the program name".to_string(),
            ));
        }

        self.apply_initial_locale()
            .map_err(|e| AgentError::InitializationFailed(format!("locale setup: {}", e)))?;

        let sink = LaunchSink::new(self.run_loop.handle());
        self.core
            .transport
            .bind(argv, sink)
            .map_err(|e| AgentError::InitializationFailed(format!("launch transport: {}", e)))?;

        if self.core.freeze.is_enabled() {
            self.run_loop.context().defer_idle(CoreEvent::SubscribeFreeze);
        }

        self.core.callbacks = callbacks;
        self.core.effects.post_hook = self.core.callbacks.low_memory_post.take();

        let created = self.core.with_app_context(|callbacks, app| {
            callbacks.create.as_mut().is_some_and(|create| create(app))
        });
        if !created {
            error!("Create callback reported failure");
            let mut cx = self.run_loop.context();
            self.core.terminate(&mut cx, false);
            return Err(AgentError::InitializationFailed(
                "create callback reported failure".to_string(),
            ));
        }

        self.core.lifecycle.mark_created()?;
        info!("Agent initialized (pid {})", self.core.freeze.pid());
        Ok(())
    }

    fn apply_initial_locale(&mut self) -> AgentResult<()> {
        let effects = &mut self.core.effects;
        let source = &self.core.source;
        for kind in [ConditionKind::LanguageChanged, ConditionKind::RegionChanged] {
            let Some(key) = kind.external_key() else {
                continue;
            };
            let Some(NotificationValue::Text(value)) = source.read(key) else {
                continue;
            };
            match kind {
                ConditionKind::LanguageChanged => effects.locale.apply_language(&value)?,
                _ => effects.locale.apply_region(&value)?,
            }
        }
        Ok(())
    }

    fn check_runnable(&self) -> AgentResult<()> {
        match self.state() {
            LifecycleState::Created | LifecycleState::Running => Ok(()),
            other => Err(AgentError::InvalidState(other)),
        }
    }

    /// Block the calling thread on the run loop until the agent terminates.
    pub fn run_main_loop(&mut self) -> AgentResult<()> {
        self.check_runnable()?;
        let result = self.run_loop.run(&mut self.core);
        self.finish(result)
    }

    /// [`run_main_loop`](Self::run_main_loop) inside an existing runtime.
    pub async fn run_main_loop_async(&mut self) -> AgentResult<()> {
        self.check_runnable()?;
        let result = self.run_loop.run_async(&mut self.core).await;
        self.finish(result)
    }

    fn finish(&mut self, result: RunLoopResult<RunLoopRunResult>) -> AgentResult<()> {
        if !self.core.lifecycle.is_dying() {
            warn!("RunLoop exited without terminate, tearing down");
            let mut cx = self.run_loop.context();
            self.core.terminate(&mut cx, false);
        }
        let outcome = result?;
        debug!("Main loop finished ({:?})", outcome);
        Ok(())
    }

    /// Initialize and run. Returns `0` or the error's negative code.
    pub fn main_entry(&mut self, argv: &[String], callbacks: LifecycleCallbacks) -> i32 {
        match self
            .initialize(callbacks, argv)
            .and_then(|()| self.run_main_loop())
        {
            Ok(()) => 0,
            Err(e) => {
                error!("main_entry failed: {} [{}]", e, e.name());
                e.code()
            }
        }
    }

    /// Set or clear a condition callback from outside the loop. Only valid
    /// between `initialize` and termination.
    pub fn set_condition_callback(
        &mut self,
        kind: ConditionKind,
        callback: Option<ConditionCallback>,
    ) -> AgentResult<()> {
        match self.state() {
            state @ (LifecycleState::Uninitialized | LifecycleState::Dying) => {
                return Err(AgentError::InvalidState(state));
            }
            _ => {}
        }
        let sink = self.core.condition_sink();
        self.core
            .registry
            .set_callback(kind, callback, self.core.source.as_mut(), &sink);
        Ok(())
    }

    pub fn set_condition_callback_by_name(
        &mut self,
        name: &str,
        callback: Option<ConditionCallback>,
    ) -> AgentResult<()> {
        let kind: ConditionKind = name.parse()?;
        self.set_condition_callback(kind, callback)
    }

    /// Post a terminate request to the loop.
    pub fn request_exit(&self) -> AgentResult<()> {
        self.exit_handle().request_exit()
    }

    pub fn request_exit_no_restart(&self) -> AgentResult<()> {
        self.exit_handle().request_exit_no_restart()
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
