//! # svcagent RunLoop
//!
//! Single-threaded event loop for the svcagent service-application core.
//!
//! ## Design
//!
//! Everything that reacts to the outside world runs on one thread. Other
//! threads never touch loop state; they post messages through a
//! [`LoopHandle`], which wakes the loop the same way a port message wakes a
//! CFRunLoop.
//!
//! ```text
//!   other threads                     loop thread
//! ┌───────────────┐  post / stop  ┌──────────────────────────────────┐
//! │  LoopHandle   │ ────────────► │ RunLoop                          │
//! └───────────────┘   (mpsc)      │  1. fire expired timers          │
//!                                 │  2. drain posted messages        │
//!                                 │  3. run deferred idle work       │
//!                                 │  4. sleep until message/deadline │
//!                                 └───────────────┬──────────────────┘
//!                                                 ▼
//!                                          EventHandler::on_event
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use svcagent_runloop::{LoopContext, LoopEvent, RunLoop, RunLoopConfig, TimerControl};
//!
//! let mut run_loop: RunLoop<&'static str> = RunLoop::new(RunLoopConfig::default());
//! run_loop.context().arm_timer(Duration::from_secs(1));
//!
//! let mut handler = |cx: &mut LoopContext<'_, &'static str>, event: LoopEvent<&'static str>| {
//!     if let LoopEvent::Timer(_) = event {
//!         cx.stop();
//!     }
//! };
//! run_loop.run(&mut handler).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod run_loop;
pub mod state;
pub mod timer;

// Re-exports
pub use config::RunLoopConfig;
pub use error::{RunLoopError, RunLoopResult};
pub use run_loop::{EventHandler, LoopContext, LoopEvent, LoopHandle, RunLoop, WakeupSignal};
pub use state::{RunLoopRunResult, RunLoopState};
pub use timer::{TimerControl, TimerId, TimerQueue};
