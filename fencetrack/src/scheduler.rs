//! Recurring timers.
//!
//! Playback ticks and watchdog checks are both "run this every N ms until
//! cancelled". Components ask a [`Scheduler`] for a timer and keep the
//! returned [`TimerId`]; the host pumps [`TimerQueue::pop_due`] and routes
//! each fired id back to its owner.

use std::time::Duration;

/// Handle for a recurring timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Start and cancel recurring tasks.
pub trait Scheduler {
    /// Arm a timer that fires every `period`, first one `period` from now.
    fn schedule_repeating(&mut self, period: Duration) -> TimerId;

    /// Disarm a timer. Returns `false` if it was not armed.
    fn cancel(&mut self, id: TimerId) -> bool;
}

#[derive(Debug, Clone)]
struct Timer {
    id: TimerId,
    period_ms: i64,
    next_due_ms: i64,
}

/// Deterministic timer queue driven by explicit time.
///
/// `pop_due` hands out one fired timer at a time so the handler for the
/// first can cancel or schedule others before the next one is considered.
#[derive(Debug)]
pub struct TimerQueue {
    timers: Vec<Timer>,
    now_ms: i64,
    next_id: u64,
    started: u64,
    cancelled: u64,
}

impl TimerQueue {
    /// Create an empty queue whose notion of "now" starts at `now_ms`.
    pub fn new(now_ms: i64) -> Self {
        Self {
            timers: Vec::new(),
            now_ms,
            next_id: 1,
            started: 0,
            cancelled: 0,
        }
    }

    /// Pop the earliest timer due at or before `now_ms` and re-arm it.
    ///
    /// When nothing is due the queue's clock moves to `now_ms`.
    pub fn pop_due(&mut self, now_ms: i64) -> Option<TimerId> {
        let earliest = self
            .timers
            .iter_mut()
            .filter(|t| t.next_due_ms <= now_ms)
            .min_by_key(|t| (t.next_due_ms, t.id));

        match earliest {
            Some(timer) => {
                self.now_ms = self.now_ms.max(timer.next_due_ms);
                timer.next_due_ms += timer.period_ms;
                Some(timer.id)
            }
            None => {
                self.now_ms = self.now_ms.max(now_ms);
                None
            }
        }
    }

    /// Current time as seen by the queue.
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    /// Next instant any timer is due, if one is armed.
    pub fn next_due_ms(&self) -> Option<i64> {
        self.timers.iter().map(|t| t.next_due_ms).min()
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.iter().any(|t| t.id == id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    /// Total timers ever armed.
    pub fn started(&self) -> u64 {
        self.started
    }

    /// Total successful cancellations.
    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }
}

impl Scheduler for TimerQueue {
    fn schedule_repeating(&mut self, period: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.started += 1;
        // Zero-length periods would fire forever within a single pump.
        let period_ms = (period.as_millis() as i64).max(1);
        self.timers.push(Timer {
            id,
            period_ms,
            next_due_ms: self.now_ms + period_ms,
        });
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        let removed = self.timers.len() != before;
        if removed {
            self.cancelled += 1;
        }
        removed
    }
}
