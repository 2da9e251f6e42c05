//! Silence-based liveness detection.
//!
//! While tracking is active a recurring check compares the time since the
//! last history write against a threshold. Only state changes are reported.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::scheduler::{Scheduler, TimerId};

/// Whether the tracked subject is still reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Debug)]
pub struct OfflineWatchdog {
    threshold_ms: i64,
    interval: Duration,
    state: Connectivity,
    timer: Option<TimerId>,
}

impl OfflineWatchdog {
    pub fn new(threshold: Duration, interval: Duration) -> Self {
        Self {
            threshold_ms: threshold.as_millis() as i64,
            interval,
            state: Connectivity::Online,
            timer: None,
        }
    }

    /// Start periodic checks. Returns `false` if already running.
    ///
    /// The state restarts optimistic (online) so a stale silence from before
    /// activation is reported by the first check, not on activation.
    pub fn activate(&mut self, scheduler: &mut dyn Scheduler) -> bool {
        if self.timer.is_some() {
            return false;
        }
        self.state = Connectivity::Online;
        self.timer = Some(scheduler.schedule_repeating(self.interval));
        info!("[OfflineWatchdog] Activated, checking every {:?}", self.interval);
        true
    }

    /// Stop periodic checks. Returns `false` if not running.
    pub fn deactivate(&mut self, scheduler: &mut dyn Scheduler) -> bool {
        let Some(timer) = self.timer.take() else {
            return false;
        };
        scheduler.cancel(timer);
        self.state = Connectivity::Online;
        info!("[OfflineWatchdog] Deactivated");
        true
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn owns_timer(&self, id: TimerId) -> bool {
        self.timer == Some(id)
    }

    pub fn state(&self) -> Connectivity {
        self.state
    }

    /// Periodic check. Returns the new state on a transition.
    ///
    /// Never evaluates while inactive or before the first sample.
    pub fn check(
        &mut self,
        now: DateTime<Utc>,
        last_write: Option<DateTime<Utc>>,
    ) -> Option<Connectivity> {
        if !self.is_active() {
            return None;
        }
        let last_write = last_write?;
        let silence_ms = (now - last_write).num_milliseconds();
        let next = if silence_ms > self.threshold_ms {
            Connectivity::Offline
        } else {
            Connectivity::Online
        };
        self.transition(next, silence_ms)
    }

    /// A fresh sample arrived.
    pub fn touch(&mut self) -> Option<Connectivity> {
        if !self.is_active() {
            return None;
        }
        self.transition(Connectivity::Online, 0)
    }

    /// Forget any silence, e.g. after the history was cleared.
    pub fn reset(&mut self) -> Option<Connectivity> {
        self.touch()
    }

    fn transition(&mut self, next: Connectivity, silence_ms: i64) -> Option<Connectivity> {
        if next == self.state {
            return None;
        }
        self.state = next;
        match next {
            Connectivity::Offline => {
                warn!("[OfflineWatchdog] No sample for {} ms, offline", silence_ms)
            }
            Connectivity::Online => info!("[OfflineWatchdog] Back online"),
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TimerQueue;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn watchdog() -> OfflineWatchdog {
        OfflineWatchdog::new(Duration::from_secs(30), Duration::from_secs(5))
    }

    #[test]
    fn test_inactive_never_fires() {
        let mut dog = watchdog();
        assert_eq!(dog.check(at(1000), Some(at(0))), None);
        assert_eq!(dog.touch(), None);
        assert_eq!(dog.state(), Connectivity::Online);
    }

    #[test]
    fn test_no_sample_never_fires() {
        let mut queue = TimerQueue::new(0);
        let mut dog = watchdog();
        dog.activate(&mut queue);
        assert_eq!(dog.check(at(1000), None), None);
    }

    #[test]
    fn test_level_triggered_transitions() {
        let mut queue = TimerQueue::new(0);
        let mut dog = watchdog();
        assert!(dog.activate(&mut queue));
        assert!(!dog.activate(&mut queue));

        assert_eq!(dog.check(at(30), Some(at(0))), None);
        assert_eq!(dog.check(at(31), Some(at(0))), Some(Connectivity::Offline));
        assert_eq!(dog.check(at(40), Some(at(0))), None);
        assert_eq!(dog.touch(), Some(Connectivity::Online));
        assert_eq!(dog.touch(), None);
        assert_eq!(dog.check(at(45), Some(at(40))), None);
    }

    #[test]
    fn test_deactivate_releases_timer() {
        let mut queue = TimerQueue::new(0);
        let mut dog = watchdog();
        dog.activate(&mut queue);
        assert_eq!(queue.active_count(), 1);
        assert!(dog.deactivate(&mut queue));
        assert!(!dog.deactivate(&mut queue));
        assert_eq!(queue.active_count(), 0);
        assert_eq!(queue.cancelled(), 1);
    }
}
