use super::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::condition::{ConditionValue, SuspendedState};
use crate::launch::{AppStatus, BACKGROUND_ALLOWED_KEY, BACKGROUND_ALLOWED_VALUE, LaunchEvent, LaunchEventKind};
use crate::loopback::{
    CountingTrimmer, LoopbackConditionSource, LoopbackFreezeChannel, LoopbackLaunchTransport,
    RecordingLocale,
};
use crate::source::{FreezeNotice, FreezeState};

const PID: u32 = 4242;
const LOW_MEMORY_KEY: &str = "memory/sysman/low_memory";
const LANGUAGE_KEY: &str = "db/menu_widget/language";

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    agent: ServiceAgent,
    transport: LoopbackLaunchTransport,
    source: LoopbackConditionSource,
    freeze: LoopbackFreezeChannel,
    locale: RecordingLocale,
    trim: CountingTrimmer,
}

fn harness_with(config: AgentConfig) -> Harness {
    let transport = LoopbackLaunchTransport::new();
    let source = LoopbackConditionSource::new();
    let freeze = LoopbackFreezeChannel::new();
    let locale = RecordingLocale::new();
    let trim = CountingTrimmer::new();

    let agent = ServiceAgent::builder()
        .config(config)
        .transport(transport.clone())
        .condition_source(source.clone())
        .freeze_channel(freeze.clone())
        .locale(locale.clone())
        .memory(MemoryFlush::new(Box::new(trim.clone())))
        .pid(PID)
        .build()
        .unwrap();

    Harness {
        agent,
        transport,
        source,
        freeze,
        locale,
        trim,
    }
}

fn harness() -> Harness {
    harness_with(AgentConfig::default())
}

fn argv() -> Vec<String> {
    vec!["svc-test".to_string()]
}

type Log = Rc<RefCell<Vec<String>>>;

fn logging_callbacks(log: &Log) -> LifecycleCallbacks {
    let create_log = log.clone();
    let control_log = log.clone();
    let terminate_log = log.clone();
    LifecycleCallbacks::new()
        .on_create(move |_cx| {
            create_log.borrow_mut().push("create".to_string());
            true
        })
        .on_app_control(move |_cx, bundle| {
            control_log
                .borrow_mut()
                .push(format!("app_control {}", bundle.len()));
        })
        .on_terminate(move || terminate_log.borrow_mut().push("terminate".to_string()))
}

fn suspend_watcher(events: &Rc<RefCell<Vec<SuspendedState>>>) -> LifecycleCallbacks {
    let events = events.clone();
    LifecycleCallbacks::new().on_create(move |cx| {
        let events = events.clone();
        cx.on_condition(ConditionKind::SuspendedStateChanged, move |event| {
            if let ConditionValue::Suspended(state) = event.value {
                events.borrow_mut().push(state);
            }
        });
        true
    })
}

fn send_later(transport: &LoopbackLaunchTransport, after: Duration, kind: LaunchEventKind) {
    send_event_later(transport, after, LaunchEvent::new(kind));
}

fn send_event_later(transport: &LoopbackLaunchTransport, after: Duration, event: LaunchEvent) {
    let transport = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        transport.send(event);
    });
}

fn background_bundle() -> Bundle {
    [(BACKGROUND_ALLOWED_KEY, BACKGROUND_ALLOWED_VALUE)]
        .into_iter()
        .collect()
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn test_builder_requires_collaborators() {
    let result = ServiceAgent::builder().build();
    assert!(matches!(result, Err(AgentError::InvalidArgument(_))));

    let result = ServiceAgent::builder()
        .transport(LoopbackLaunchTransport::new())
        .build();
    assert!(matches!(result, Err(AgentError::InvalidArgument(_))));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = AgentConfig::default();
    config.suspend.delay_ms = 0;
    let result = ServiceAgent::builder()
        .config(config)
        .transport(LoopbackLaunchTransport::new())
        .condition_source(LoopbackConditionSource::new())
        .build();
    assert!(matches!(result, Err(AgentError::Config(_))));
}

#[test]
fn test_initialize_binds_and_creates() {
    let mut h = harness();
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();

    assert_eq!(h.agent.state(), LifecycleState::Created);
    assert!(h.transport.is_bound());
    assert_eq!(h.transport.bound_argv(), argv());
    assert_eq!(*log.borrow(), vec!["create"]);
}

#[test]
fn test_initialize_twice() {
    let mut h = harness();
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();
    let second = h.agent.initialize(logging_callbacks(&log), &argv());
    assert!(matches!(second, Err(AgentError::AlreadyRunning)));
}

#[test]
fn test_initialize_argument_checks() {
    let mut h = harness();
    let missing_create = h.agent.initialize(LifecycleCallbacks::new(), &argv());
    assert!(matches!(missing_create, Err(AgentError::InvalidArgument(_))));

    let log: Log = Rc::default();
    let empty_argv = h.agent.initialize(logging_callbacks(&log), &[]);
    assert!(matches!(empty_argv, Err(AgentError::InvalidArgument(_))));
    assert_eq!(h.agent.state(), LifecycleState::Uninitialized);
}

#[test]
fn test_bind_failure() {
    let mut h = harness();
    h.transport.fail_bind();
    let log: Log = Rc::default();
    let result = h.agent.initialize(logging_callbacks(&log), &argv());
    assert!(matches!(result, Err(AgentError::InitializationFailed(_))));
    assert!(log.borrow().is_empty());
    assert_eq!(h.agent.state(), LifecycleState::Uninitialized);
}

#[test]
fn test_locale_failure() {
    let mut h = harness();
    h.source
        .set_value(LANGUAGE_KEY, NotificationValue::Text("en_US.UTF-8".to_string()));
    h.locale.fail();
    let log: Log = Rc::default();
    let result = h.agent.initialize(logging_callbacks(&log), &argv());
    assert!(matches!(result, Err(AgentError::InitializationFailed(_))));
}

#[test]
fn test_initial_locale_applied() {
    let mut h = harness();
    h.source
        .set_value(LANGUAGE_KEY, NotificationValue::Text("en_US.UTF-8".to_string()));
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();
    assert_eq!(h.locale.languages(), vec!["en_US.UTF-8"]);
    assert!(h.locale.regions().is_empty());
}

#[test]
fn test_create_failure_terminates_once() {
    let mut h = harness();
    let terminated = Rc::new(RefCell::new(0));
    let counter = terminated.clone();
    let callbacks = LifecycleCallbacks::new()
        .on_create(|cx| {
            cx.on_condition(ConditionKind::LowBattery, |_| {});
            false
        })
        .on_terminate(move || *counter.borrow_mut() += 1);

    let code = h.agent.main_entry(&argv(), callbacks);
    assert_eq!(code, -libc::ECANCELED);
    assert_eq!(*terminated.borrow(), 1);
    assert_eq!(h.agent.state(), LifecycleState::Dying);
    assert_eq!(h.source.subscription_count(), 0);
    assert_eq!(h.transport.statuses(), vec![AppStatus::Dying]);

    assert!(matches!(
        h.agent.run_main_loop(),
        Err(AgentError::InvalidState(LifecycleState::Dying))
    ));
}

#[test]
fn test_run_before_initialize() {
    let mut h = harness();
    assert!(matches!(
        h.agent.run_main_loop(),
        Err(AgentError::InvalidState(LifecycleState::Uninitialized))
    ));
}

// ============================================================================
// Lifecycle through the loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_then_terminate() {
    let mut h = harness();
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();

    let bundle: Bundle = [("op", "sync")].into_iter().collect();
    h.transport
        .send(LaunchEvent::with_bundle(LaunchEventKind::Start, bundle));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Start));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["create", "app_control 1", "app_control 0", "terminate"]
    );
    assert_eq!(h.agent.state(), LifecycleState::Dying);
    assert_eq!(
        h.transport.statuses(),
        vec![AppStatus::Running, AppStatus::Dying]
    );
}

#[tokio::test(start_paused = true)]
async fn test_terminate_without_start() {
    let mut h = harness();
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();
    h.transport
        .send(LaunchEvent::new(LaunchEventKind::TerminateBackgroundApp));
    h.agent.run_main_loop_async().await.unwrap();
    assert_eq!(*log.borrow(), vec!["create", "terminate"]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_exit_requests_terminate_once() {
    let mut h = harness();
    let log: Log = Rc::default();
    let terminate_log = log.clone();
    let callbacks = LifecycleCallbacks::new()
        .on_create(|cx| {
            cx.request_exit().unwrap();
            cx.request_exit().unwrap();
            true
        })
        .on_terminate(move || terminate_log.borrow_mut().push("terminate".to_string()));
    h.agent.initialize(callbacks, &argv()).unwrap();
    h.agent.request_exit().unwrap();
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));

    h.agent.run_main_loop_async().await.unwrap();
    assert_eq!(*log.borrow(), vec!["terminate"]);
    assert!(!h.transport.no_restart_requested());
}

#[tokio::test(start_paused = true)]
async fn test_exit_no_restart_from_app_control() {
    let mut h = harness();
    let callbacks = LifecycleCallbacks::new()
        .on_create(|_| true)
        .on_app_control(|cx, _| {
            cx.request_exit_no_restart().unwrap();
        });
    h.agent.initialize(callbacks, &argv()).unwrap();
    h.transport.send(LaunchEvent::new(LaunchEventKind::Start));

    h.agent.run_main_loop_async().await.unwrap();
    assert!(h.transport.no_restart_requested());
    assert_eq!(h.agent.state(), LifecycleState::Dying);
}

#[tokio::test(start_paused = true)]
async fn test_events_after_terminate_are_dropped() {
    let mut h = harness();
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Start));
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(*log.borrow(), vec!["create", "terminate"]);
    assert!(matches!(
        h.agent.set_condition_callback(ConditionKind::LowMemory, None),
        Err(AgentError::InvalidState(LifecycleState::Dying))
    ));
}

// ============================================================================
// Suspend timer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_suspend_fire_then_wake() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_later(&h.transport, Duration::from_secs(6), LaunchEventKind::Wake);
    send_later(&h.transport, Duration::from_secs(7), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(
        *events.borrow(),
        vec![
            SuspendedState::WillEnterSuspend,
            SuspendedState::DidExitFromSuspend
        ]
    );
    assert_eq!(h.trim.count(), 1);
    assert_eq!(h.agent.suspend_state(), SuspendState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_wake_before_timer_skips_flush() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_later(&h.transport, Duration::from_secs(1), LaunchEventKind::Wake);
    send_later(&h.transport, Duration::from_secs(30), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert!(events.borrow().is_empty());
    assert_eq!(h.trim.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_terminate_cancels_pending_timer() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(h.trim.count(), 0);
    assert_eq!(h.agent.suspend_state(), SuspendState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_background_allowed_never_suspends() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    h.transport.send(LaunchEvent::with_bundle(
        LaunchEventKind::Start,
        background_bundle(),
    ));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_later(&h.transport, Duration::from_secs(60), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert!(h.agent.is_background_allowed());
    assert!(events.borrow().is_empty());
    assert_eq!(h.trim.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_background_grant_wakes_suspended_process() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_event_later(
        &h.transport,
        Duration::from_secs(6),
        LaunchEvent::with_bundle(LaunchEventKind::Start, background_bundle()),
    );
    send_later(&h.transport, Duration::from_secs(7), LaunchEventKind::Suspend);
    send_later(&h.transport, Duration::from_secs(60), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert!(h.agent.is_background_allowed());
    assert_eq!(h.agent.suspend_state(), SuspendState::Active);
    assert_eq!(
        *events.borrow(),
        vec![
            SuspendedState::WillEnterSuspend,
            SuspendedState::DidExitFromSuspend
        ]
    );
    assert_eq!(h.trim.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_with_marker_allows_background() {
    let mut h = harness();
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();

    h.transport.send(LaunchEvent::with_bundle(
        LaunchEventKind::Resume,
        background_bundle(),
    ));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_later(&h.transport, Duration::from_secs(60), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert!(h.agent.is_background_allowed());
    assert_eq!(h.agent.suspend_state(), SuspendState::Active);
    assert_eq!(h.trim.count(), 0);
    // Resume neither runs app control nor starts the app.
    assert_eq!(*log.borrow(), vec!["create", "terminate"]);
    assert_eq!(h.transport.statuses(), vec![AppStatus::Dying]);
}

#[tokio::test(start_paused = true)]
async fn test_resume_without_marker_changes_nothing() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    let bundle: Bundle = [("op", "refresh")].into_iter().collect();
    h.transport
        .send(LaunchEvent::with_bundle(LaunchEventKind::Resume, bundle));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Resume));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_later(&h.transport, Duration::from_secs(6), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert!(!h.agent.is_background_allowed());
    assert_eq!(*events.borrow(), vec![SuspendedState::WillEnterSuspend]);
    assert_eq!(h.trim.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_suspend_delay_from_config() {
    let mut config = AgentConfig::default();
    config.suspend.delay_ms = 100;
    let mut h = harness_with(config);
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();

    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));
    send_later(&h.transport, Duration::from_millis(150), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(*events.borrow(), vec![SuspendedState::WillEnterSuspend]);
}

// ============================================================================
// Freeze / thaw
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_thaw_rearms_suspend_timer() {
    let mut h = harness();
    let events = Rc::new(RefCell::new(Vec::new()));
    h.agent.initialize(suspend_watcher(&events), &argv()).unwrap();
    h.transport.send(LaunchEvent::new(LaunchEventKind::Suspend));

    let freeze = h.freeze.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(6)).await;
        freeze.broadcast(FreezeNotice {
            pid: 1,
            state: FreezeState::Thawed,
        });
        freeze.broadcast(FreezeNotice {
            pid: PID,
            state: FreezeState::Frozen,
        });
        freeze.broadcast(FreezeNotice {
            pid: PID,
            state: FreezeState::Thawed,
        });
    });
    send_later(&h.transport, Duration::from_secs(20), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert!(h.agent.is_freeze_subscribed());
    assert_eq!(h.freeze.subscribe_calls(), 1);
    assert_eq!(
        *events.borrow(),
        vec![
            SuspendedState::WillEnterSuspend,
            SuspendedState::DidExitFromSuspend,
            SuspendedState::WillEnterSuspend,
        ]
    );
    assert_eq!(h.trim.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_freeze_disabled_by_config() {
    let mut config = AgentConfig::default();
    config.freeze.enabled = false;
    let mut h = harness_with(config);
    let log: Log = Rc::default();
    h.agent.initialize(logging_callbacks(&log), &argv()).unwrap();
    send_later(&h.transport, Duration::from_secs(1), LaunchEventKind::Terminate);
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(h.freeze.subscribe_calls(), 0);
    assert!(!h.agent.is_freeze_subscribed());
}

// ============================================================================
// Conditions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_low_memory_threshold_end_to_end() {
    let mut h = harness();
    let calls = Rc::new(RefCell::new(0));
    let counter = calls.clone();
    let callbacks = LifecycleCallbacks::new().on_create(move |cx| {
        let counter = counter.clone();
        cx.on_condition(ConditionKind::LowMemory, move |_| *counter.borrow_mut() += 1);
        true
    });
    h.agent.initialize(callbacks, &argv()).unwrap();
    assert!(h.agent.is_subscribed(ConditionKind::LowMemory));

    assert!(h.source.publish(LOW_MEMORY_KEY, NotificationValue::Int(1)));
    assert!(h.source.publish(LOW_MEMORY_KEY, NotificationValue::Int(2)));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(*calls.borrow(), 1);
    // The post step runs for every low-memory notice.
    assert_eq!(h.trim.count(), 2);
    assert_eq!(h.source.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_low_memory_post_notify() {
    let mut config = AgentConfig::default();
    config.conditions.low_memory_post = crate::config::LowMemoryPost::Notify;
    let mut h = harness_with(config);
    let posts = Rc::new(RefCell::new(0));
    let counter = posts.clone();
    let callbacks = LifecycleCallbacks::new()
        .on_create(|cx| {
            cx.on_condition(ConditionKind::LowMemory, |_| {});
            true
        })
        .on_low_memory_post(move || *counter.borrow_mut() += 1);
    h.agent.initialize(callbacks, &argv()).unwrap();

    h.source.publish(LOW_MEMORY_KEY, NotificationValue::Int(4));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(*posts.borrow(), 1);
    assert_eq!(h.trim.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_language_change_updates_locale_then_calls_back() {
    let mut h = harness();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let locale = h.locale.clone();
    let callbacks = LifecycleCallbacks::new().on_create(move |cx| {
        let sink = sink.clone();
        let locale = locale.clone();
        cx.on_condition(ConditionKind::LanguageChanged, move |event| {
            // The locale is already applied when the callback runs.
            sink.borrow_mut()
                .push((event.value.clone(), locale.languages().len()));
        });
        true
    });
    h.agent.initialize(callbacks, &argv()).unwrap();

    h.source
        .publish(LANGUAGE_KEY, NotificationValue::Text("ko_KR.UTF-8".to_string()));
    h.transport.send(LaunchEvent::new(LaunchEventKind::Terminate));
    h.agent.run_main_loop_async().await.unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![(ConditionValue::Language("ko_KR.UTF-8".to_string()), 1)]
    );
    assert_eq!(h.locale.languages(), vec!["ko_KR.UTF-8"]);
}

#[test]
fn test_set_callback_before_initialize_rejected() {
    let mut h = harness();
    let result = h
        .agent
        .set_condition_callback(ConditionKind::LowBattery, Some(Box::new(|_: &ConditionEvent| {})));
    assert!(matches!(
        result,
        Err(AgentError::InvalidState(LifecycleState::Uninitialized))
    ));
    assert_eq!(h.source.subscribe_calls(), 0);
    assert!(!h.agent.is_subscribed(ConditionKind::LowBattery));
}

#[test]
fn test_set_and_clear_callback_from_outside() {
    let mut h = harness();
    h.agent
        .initialize(LifecycleCallbacks::new().on_create(|_| true), &argv())
        .unwrap();
    h.agent
        .set_condition_callback_by_name("low_battery", Some(Box::new(|_: &ConditionEvent| {})))
        .unwrap();
    assert!(h.agent.is_subscribed(ConditionKind::LowBattery));
    assert!(h.source.is_subscribed("memory/sysman/battery_status_low"));

    h.agent
        .set_condition_callback(ConditionKind::LowBattery, None)
        .unwrap();
    assert!(!h.agent.is_subscribed(ConditionKind::LowBattery));
    assert_eq!(h.source.subscription_count(), 0);

    assert!(matches!(
        h.agent.set_condition_callback_by_name("shake", None),
        Err(AgentError::UnknownEvent(_))
    ));
}
