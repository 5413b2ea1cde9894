//! End-to-end tests for the RunLoop.
//!
//! These drive a loop the way the agent core does: a handler struct owning
//! its own state, timers armed from inside handlers, and work posted from
//! other threads.

use std::time::Duration;

use svcagent_runloop::{
    EventHandler, LoopContext, LoopEvent, RunLoop, RunLoopConfig, RunLoopRunResult, TimerControl,
    TimerId,
};

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    ArmTimer(u64),
    Cancel,
    Quit,
}

/// Handler that keeps at most one timer outstanding, like a debounce.
#[derive(Default)]
struct Debouncer {
    timer: Option<TimerId>,
    fired: u32,
    log: Vec<String>,
}

impl EventHandler<Command> for Debouncer {
    fn on_event(&mut self, cx: &mut LoopContext<'_, Command>, event: LoopEvent<Command>) {
        match event {
            LoopEvent::Message(Command::ArmTimer(ms)) => {
                if let Some(old) = self.timer.take() {
                    cx.cancel_timer(old);
                }
                self.timer = Some(cx.arm_timer(Duration::from_millis(ms)));
                self.log.push(format!("arm {}", ms));
            }
            LoopEvent::Message(Command::Cancel) => {
                if let Some(old) = self.timer.take() {
                    cx.cancel_timer(old);
                }
                self.log.push("cancel".to_string());
            }
            LoopEvent::Message(Command::Quit) => {
                self.log.push("quit".to_string());
                cx.stop();
            }
            LoopEvent::Timer(id) => {
                if self.timer == Some(id) {
                    self.timer = None;
                    self.fired += 1;
                    self.log.push("fired".to_string());
                    cx.post(Command::Quit).unwrap();
                }
            }
            LoopEvent::Idle(_) => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rearm_replaces_previous_timer() {
    let mut run_loop = RunLoop::new(RunLoopConfig::default());
    let handle = run_loop.handle();
    handle.post(Command::ArmTimer(100)).unwrap();
    handle.post(Command::ArmTimer(500)).unwrap();

    let mut handler = Debouncer::default();
    let result = run_loop.run_async(&mut handler).await.unwrap();

    assert_eq!(result, RunLoopRunResult::Stopped);
    assert_eq!(handler.fired, 1);
    assert_eq!(handler.log, vec!["arm 100", "arm 500", "fired", "quit"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_deadline() {
    let mut run_loop = RunLoop::new(RunLoopConfig::default());
    let handle = run_loop.handle();
    handle.post(Command::ArmTimer(1000)).unwrap();
    handle.post(Command::Cancel).unwrap();

    let quit = handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        quit.post(Command::Quit).unwrap();
    });

    let mut handler = Debouncer::default();
    run_loop.run_async(&mut handler).await.unwrap();

    assert_eq!(handler.fired, 0);
    assert_eq!(handler.log, vec!["arm 1000", "cancel", "quit"]);
}

#[test]
fn test_quit_from_other_thread_while_waiting() {
    let mut run_loop = RunLoop::new(RunLoopConfig {
        name: "integration".to_string(),
        ..Default::default()
    });
    let handle = run_loop.handle();

    let sender = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        handle.post(Command::Quit).unwrap();
    });

    let mut handler = Debouncer::default();
    let result = run_loop.run(&mut handler).unwrap();
    sender.join().unwrap();

    assert_eq!(result, RunLoopRunResult::Stopped);
    assert_eq!(handler.log, vec!["quit"]);
}

#[tokio::test(start_paused = true)]
async fn test_small_batch_still_drains_everything() {
    let mut run_loop = RunLoop::new(RunLoopConfig {
        max_batch: 1,
        ..Default::default()
    });
    let handle = run_loop.handle();
    for ms in [10, 20, 30] {
        handle.post(Command::ArmTimer(ms)).unwrap();
    }

    let mut handler = Debouncer::default();
    run_loop.run_async(&mut handler).await.unwrap();

    assert_eq!(handler.fired, 1);
    assert_eq!(handler.log.len(), 5);
}
