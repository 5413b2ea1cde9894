//! # svcagent core
//!
//! Lifecycle state machine, condition subscription registry and deferred
//! background-suspend coordinator for single-instance service processes.
//!
//! ## Structure
//!
//! - [`app`]: `ServiceAgent`, its builder and the callback surface
//! - [`dispatch`]: routes loop events to the components below
//! - [`lifecycle`]: `Uninitialized → Created → Running → Dying`
//! - [`registry`]: condition callbacks and external subscriptions
//! - [`suspend`]: the deferred suspend timer
//! - [`freeze`]: freeze/thaw listener
//! - [`launch`], [`source`]: collaborator seams
//! - [`loopback`]: in-process collaborators for tests and demos

pub mod app;
pub mod condition;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod freeze;
pub mod launch;
pub mod lifecycle;
pub mod locale;
pub mod loopback;
pub mod memory;
pub mod registry;
pub mod source;
pub mod suspend;

// Re-exports
pub use app::{
    AppContext, AppControlCallback, CreateCallback, ExitHandle, HookCallback, LifecycleCallbacks,
    ServiceAgent, ServiceAgentBuilder,
};
pub use condition::{
    BatteryLevel, ConditionEvent, ConditionKind, ConditionNotice, ConditionValue, MemoryPressure,
    NotificationValue, SuspendedState,
};
pub use config::{AgentConfig, ConfigLoader, LowMemoryPost};
pub use dispatch::CoreEvent;
pub use error::{AgentError, AgentResult, ConfigError, SubscriptionError};
pub use launch::{
    AppStatus, BACKGROUND_ALLOWED_KEY, BACKGROUND_ALLOWED_VALUE, Bundle, LaunchEvent,
    LaunchEventKind, LaunchSink, LaunchTransport,
};
pub use lifecycle::LifecycleState;
pub use locale::{LocaleEnv, ProcessLocale};
pub use loopback::{
    CountingTrimmer, LoopbackConditionSource, LoopbackFreezeChannel, LoopbackLaunchTransport,
    RecordingLocale,
};
pub use memory::{AllocatorTrim, MemoryFlush, MemoryTrimmer};
pub use registry::{ConditionCallback, ConditionHooks, ConditionRegistry, DispatchOutcome};
pub use source::{
    ConditionSink, ConditionSource, FreezeChannel, FreezeNotice, FreezeSink, FreezeState,
    FreezeSubscription,
};
pub use suspend::{SuspendCoordinator, SuspendState};
