//! RunLoop core implementation.
//!
//! The RunLoop owns everything that must only be touched from the loop
//! thread: the timer queue, the idle queue and the receiving end of the
//! wakeup channel. Other threads talk to it through a [`LoopHandle`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::RunLoopConfig;
use crate::error::{RunLoopError, RunLoopResult};
use crate::state::{RunLoopRunResult, RunLoopState};
use crate::timer::{TimerControl, TimerId, TimerQueue};

/// Wakeup signal for the RunLoop.
#[derive(Debug)]
pub enum WakeupSignal<E> {
    /// A message posted from any thread.
    Post(E),
    /// Stop the RunLoop.
    Stop,
}

/// Event handed to the [`EventHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent<E> {
    /// A message posted through a [`LoopHandle`].
    Message(E),
    /// A one-shot timer reached its deadline.
    Timer(TimerId),
    /// Work deferred with [`LoopContext::defer_idle`], run once the loop has
    /// nothing else to do.
    Idle(E),
}

impl<E> LoopEvent<E> {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LoopEvent::Message(_) => "message",
            LoopEvent::Timer(_) => "timer",
            LoopEvent::Idle(_) => "idle",
        }
    }
}

/// Receives every event on the loop thread.
pub trait EventHandler<E> {
    /// Handle one event. Must not block.
    fn on_event(&mut self, cx: &mut LoopContext<'_, E>, event: LoopEvent<E>);
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(&mut LoopContext<'_, E>, LoopEvent<E>),
{
    fn on_event(&mut self, cx: &mut LoopContext<'_, E>, event: LoopEvent<E>) {
        self(cx, event)
    }
}

/// Thread-safe handle used to post messages into a RunLoop.
pub struct LoopHandle<E> {
    tx: mpsc::UnboundedSender<WakeupSignal<E>>,
}

impl<E> Clone for LoopHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> std::fmt::Debug for LoopHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<E> LoopHandle<E> {
    /// Post a message; it is handled on the loop thread in FIFO order.
    pub fn post(&self, event: E) -> RunLoopResult<()> {
        self.tx
            .send(WakeupSignal::Post(event))
            .map_err(|_| RunLoopError::ChannelClosed)
    }

    /// Ask the loop to stop after the current event.
    pub fn stop(&self) -> RunLoopResult<()> {
        self.tx
            .send(WakeupSignal::Stop)
            .map_err(|_| RunLoopError::ChannelClosed)
    }

    /// Whether the loop has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Loop-thread view handed to handlers: timers, idle queue and stop control.
pub struct LoopContext<'a, E> {
    timers: &'a mut TimerQueue,
    idle: &'a mut VecDeque<E>,
    stop_requested: &'a mut bool,
    handle: &'a LoopHandle<E>,
}

impl<E> LoopContext<'_, E> {
    /// Clone the loop handle.
    pub fn handle(&self) -> LoopHandle<E> {
        self.handle.clone()
    }

    /// Post a message back into the loop; it runs after the current event.
    pub fn post(&self, event: E) -> RunLoopResult<()> {
        self.handle.post(event)
    }

    /// Defer work until the loop next runs out of pending events.
    pub fn defer_idle(&mut self, event: E) {
        self.idle.push_back(event);
    }

    /// Stop the loop once the current event returns.
    pub fn stop(&mut self) {
        *self.stop_requested = true;
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        *self.stop_requested
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of deferred idle events.
    pub fn pending_idle(&self) -> usize {
        self.idle.len()
    }
}

impl<E> TimerControl for LoopContext<'_, E> {
    fn arm_timer(&mut self, delay: Duration) -> TimerId {
        self.timers.arm_timer(delay)
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel_timer(id)
    }

    fn is_armed(&self, id: TimerId) -> bool {
        self.timers.is_armed(id)
    }
}

/// Single-threaded event loop.
///
/// Each iteration fires expired timers, then drains up to
/// `max_batch` posted messages, then runs deferred idle work, and finally
/// sleeps until the next message or timer deadline.
pub struct RunLoop<E> {
    config: RunLoopConfig,
    state: RunLoopState,
    handle: LoopHandle<E>,
    wakeup_rx: mpsc::UnboundedReceiver<WakeupSignal<E>>,
    timers: TimerQueue,
    idle: VecDeque<E>,
    stop_requested: bool,
    iterations: u64,
}

impl<E> RunLoop<E> {
    /// Create a new RunLoop.
    pub fn new(config: RunLoopConfig) -> Self {
        let (tx, wakeup_rx) = mpsc::unbounded_channel();
        Self {
            config,
            state: RunLoopState::Created,
            handle: LoopHandle { tx },
            wakeup_rx,
            timers: TimerQueue::new(),
            idle: VecDeque::new(),
            stop_requested: false,
            iterations: 0,
        }
    }

    /// Get a handle for posting from other threads.
    pub fn handle(&self) -> LoopHandle<E> {
        self.handle.clone()
    }

    /// Get current state.
    pub fn state(&self) -> RunLoopState {
        self.state
    }

    /// Get the configuration.
    pub fn config(&self) -> &RunLoopConfig {
        &self.config
    }

    /// Number of loop iterations so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of deferred idle events.
    pub fn pending_idle(&self) -> usize {
        self.idle.len()
    }

    /// Borrow a loop context outside of `run`, e.g. while wiring things up
    /// before the loop starts.
    pub fn context(&mut self) -> LoopContext<'_, E> {
        LoopContext {
            timers: &mut self.timers,
            idle: &mut self.idle,
            stop_requested: &mut self.stop_requested,
            handle: &self.handle,
        }
    }

    /// Run the loop on the calling thread until stopped.
    ///
    /// Builds a current-thread tokio runtime and blocks on it, so this must
    /// not be called from inside another runtime.
    pub fn run<H: EventHandler<E>>(&mut self, handler: &mut H) -> RunLoopResult<RunLoopRunResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.run_async(handler))
    }

    /// Run the loop inside an existing runtime until stopped.
    pub async fn run_async<H: EventHandler<E>>(
        &mut self,
        handler: &mut H,
    ) -> RunLoopResult<RunLoopRunResult> {
        match self.state {
            RunLoopState::Created => {}
            RunLoopState::Running | RunLoopState::Waiting => {
                return Err(RunLoopError::AlreadyRunning);
            }
            other => return Err(RunLoopError::InvalidState(other)),
        }

        self.state = RunLoopState::Running;
        info!("RunLoop '{}' entered", self.config.name);

        let result = loop {
            self.iterations += 1;

            if self.stop_requested {
                break RunLoopRunResult::Stopped;
            }

            let fired = self.fire_expired_timers(handler);
            if self.stop_requested {
                continue;
            }

            let (handled, external_stop) = self.drain_posted(handler);
            if external_stop {
                break RunLoopRunResult::StoppedExternally;
            }
            if fired || handled > 0 {
                continue;
            }

            if !self.idle.is_empty() {
                self.run_idle(handler);
                continue;
            }

            self.state = RunLoopState::Waiting;
            let wakeup = self.wait_for_wakeup().await;
            self.state = RunLoopState::Running;

            match wakeup {
                Some(WakeupSignal::Post(event)) => {
                    self.dispatch(handler, LoopEvent::Message(event));
                }
                Some(WakeupSignal::Stop) => break RunLoopRunResult::StoppedExternally,
                None => {}
            }
        };

        self.state = RunLoopState::Stopping;
        self.timers.clear();
        self.idle.clear();
        self.state = RunLoopState::Stopped;

        info!("RunLoop '{}' stopped ({:?})", self.config.name, result);
        Ok(result)
    }

    fn fire_expired_timers<H: EventHandler<E>>(&mut self, handler: &mut H) -> bool {
        let now = tokio::time::Instant::now();
        let mut fired = false;
        while let Some(id) = self.timers.pop_expired(now) {
            fired = true;
            self.dispatch(handler, LoopEvent::Timer(id));
            if self.stop_requested {
                break;
            }
        }
        fired
    }

    fn drain_posted<H: EventHandler<E>>(&mut self, handler: &mut H) -> (usize, bool) {
        let mut handled = 0;
        while handled < self.config.max_batch {
            match self.wakeup_rx.try_recv() {
                Ok(WakeupSignal::Post(event)) => {
                    handled += 1;
                    self.dispatch(handler, LoopEvent::Message(event));
                    if self.stop_requested {
                        break;
                    }
                }
                Ok(WakeupSignal::Stop) => return (handled, true),
                Err(_) => break,
            }
        }
        (handled, false)
    }

    fn run_idle<H: EventHandler<E>>(&mut self, handler: &mut H) {
        let pending: Vec<E> = self.idle.drain(..).collect();
        debug!("RunLoop: running {} idle event(s)", pending.len());
        for event in pending {
            self.dispatch(handler, LoopEvent::Idle(event));
            if self.stop_requested {
                break;
            }
        }
    }

    /// Wait for a posted signal or the next timer deadline.
    ///
    /// Returns `None` when woken by a deadline.
    async fn wait_for_wakeup(&mut self) -> Option<WakeupSignal<E>> {
        match self.timers.next_deadline() {
            Some(deadline) => {
                tokio::select! {
                    signal = self.wakeup_rx.recv() => signal,
                    _ = tokio::time::sleep_until(deadline) => None,
                }
            }
            None => self.wakeup_rx.recv().await,
        }
    }

    fn dispatch<H: EventHandler<E>>(&mut self, handler: &mut H, event: LoopEvent<E>) {
        debug!("RunLoop: dispatch {}", event.kind());
        let mut cx = LoopContext {
            timers: &mut self.timers,
            idle: &mut self.idle,
            stop_requested: &mut self.stop_requested,
            handle: &self.handle,
        };
        handler.on_event(&mut cx, event);
    }
}

impl<E> Default for RunLoop<E> {
    fn default() -> Self {
        Self::new(RunLoopConfig::default())
    }
}

#[cfg(test)]
#[path = "run_loop_tests.rs"]
mod tests;
