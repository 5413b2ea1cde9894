//! One-shot timers owned by the RunLoop.
//!
//! Timers live in a deadline-ordered queue on the loop thread. Arming returns
//! a [`TimerId`]; when the deadline passes the loop hands the id back to the
//! event handler as [`LoopEvent::Timer`](crate::LoopEvent::Timer). Cancelling
//! an id that already fired (or was never armed) is a no-op.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Identifier of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Ability to arm and cancel one-shot timers.
///
/// Implemented by [`TimerQueue`] and by the handler-facing
/// [`LoopContext`](crate::LoopContext).
pub trait TimerControl {
    /// Arm a one-shot timer firing after `delay`.
    fn arm_timer(&mut self, delay: Duration) -> TimerId;

    /// Cancel a timer. Returns `true` if it was still pending.
    fn cancel_timer(&mut self, id: TimerId) -> bool;

    /// Check whether a timer is still pending.
    fn is_armed(&self, id: TimerId) -> bool;
}

/// Deadline-ordered set of pending one-shot timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    by_deadline: BTreeSet<(Instant, TimerId)>,
    deadlines: HashMap<TimerId, Instant>,
}

impl TimerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer at an absolute deadline.
    pub fn arm_at(&mut self, deadline: Instant) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.by_deadline.insert((deadline, id));
        self.deadlines.insert(id, deadline);
        id
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Check if no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.first().map(|(deadline, _)| *deadline)
    }

    /// Remove and return the earliest timer whose deadline is at or before `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerId> {
        let (deadline, id) = *self.by_deadline.first()?;
        if deadline > now {
            return None;
        }
        self.by_deadline.remove(&(deadline, id));
        self.deadlines.remove(&id);
        Some(id)
    }

    /// Drop every pending timer.
    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}

impl TimerControl for TimerQueue {
    fn arm_timer(&mut self, delay: Duration) -> TimerId {
        let id = self.arm_at(Instant::now() + delay);
        debug!("Timer {} armed ({:?})", id, delay);
        id
    }

    fn cancel_timer(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => {
                self.by_deadline.remove(&(deadline, id));
                debug!("Timer {} cancelled", id);
                true
            }
            None => false,
        }
    }

    fn is_armed(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
