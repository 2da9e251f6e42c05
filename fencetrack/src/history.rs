//! Bounded, arrival-ordered track history.
//!
//! Live ingestion appends with FIFO eviction at `capacity`. A replay load
//! installs an explicit set that is allowed to exceed it and is never evicted
//! from until the history is cleared or replaced with a live set.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::{LngLat, TrackPoint};

/// How a point set larger than the capacity is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep only the most recent `capacity` points.
    Live,
    /// Keep everything; the set was loaded on purpose.
    /// Appends never evict.
    Replay,
}

/// Single source of truth for both the live and the replay view.
#[derive(Debug, Clone)]
pub struct TrackHistory {
    points: VecDeque<TrackPoint>,
    capacity: usize,
    retention: Retention,
    last_write: Option<DateTime<Utc>>,
}

impl TrackHistory {
    /// Create an empty history. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            retention: Retention::Live,
            last_write: None,
        }
    }

    /// Append at the end, evicting from the front past capacity.
    ///
    /// `at` is the arrival instant, recorded for the offline watchdog.
    /// Returns how many points were evicted.
    pub fn append(&mut self, point: TrackPoint, at: DateTime<Utc>) -> usize {
        self.points.push_back(point);
        self.last_write = Some(at);

        let mut evicted = 0;
        while self.retention == Retention::Live && self.points.len() > self.capacity {
            self.points.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Discard the current content and install `points` in order.
    pub fn replace_all(&mut self, points: Vec<TrackPoint>, retention: Retention) {
        let skip = match retention {
            Retention::Live => points.len().saturating_sub(self.capacity),
            Retention::Replay => 0,
        };
        self.points = points.into_iter().skip(skip).collect();
        self.retention = retention;
    }

    /// Drop every point, forget the last write and go back to live retention.
    pub fn clear(&mut self) {
        self.replace_all(Vec::new(), Retention::Live);
        self.last_write = None;
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn latest(&self) -> Option<&TrackPoint> {
        self.points.back()
    }

    /// Bounds-checked lookup.
    pub fn at(&self, index: usize) -> Option<&TrackPoint> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arrival instant of the most recent `append`.
    pub fn last_write(&self) -> Option<DateTime<Utc>> {
        self.last_write
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TrackPoint> + ExactSizeIterator {
        self.points.iter()
    }

    /// Positions from the first point up to and including `index`
    /// (clamped to the last point).
    pub fn path_prefix(&self, index: usize) -> Vec<LngLat> {
        let end = index.saturating_add(1).min(self.points.len());
        self.points.range(..end).map(TrackPoint::position).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::Value;

    fn point(i: usize) -> TrackPoint {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::seconds(i as i64);
        TrackPoint::new(
            LngLat::new(i as f64, 0.0),
            ts,
            String::new(),
            0.0,
            false,
            "device".to_string(),
            Value::Null,
        )
    }

    fn lngs(history: &TrackHistory) -> Vec<f64> {
        history.iter().map(|p| p.longitude()).collect()
    }

    #[test]
    fn test_append_never_exceeds_capacity() {
        for (n, c) in [(0, 3), (2, 3), (3, 3), (10, 3), (7, 1)] {
            let mut history = TrackHistory::new(c);
            let now = Utc::now();
            for i in 0..n {
                history.append(point(i), now);
            }
            assert_eq!(history.len(), n.min(c));
            let expected: Vec<f64> = (n.saturating_sub(c)..n).map(|i| i as f64).collect();
            assert_eq!(lngs(&history), expected);
        }
    }

    #[test]
    fn test_append_reports_eviction_and_last_write() {
        let mut history = TrackHistory::new(2);
        assert!(history.last_write().is_none());
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(history.append(point(0), at), 0);
        assert_eq!(history.append(point(1), at), 0);
        assert_eq!(history.append(point(2), at), 1);
        assert_eq!(history.last_write(), Some(at));
        assert_eq!(history.latest().unwrap().longitude(), 2.0);
    }

    #[test]
    fn test_replace_all_retention() {
        let mut history = TrackHistory::new(3);
        let points: Vec<TrackPoint> = (0..5).map(point).collect();

        history.replace_all(points.clone(), Retention::Live);
        assert_eq!(lngs(&history), vec![2.0, 3.0, 4.0]);

        history.replace_all(points, Retention::Replay);
        assert_eq!(history.len(), 5);

        history.replace_all(Vec::new(), Retention::Replay);
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn test_replay_set_is_not_evicted_until_cleared() {
        let mut history = TrackHistory::new(3);
        history.replace_all((0..5).map(point).collect(), Retention::Replay);
        assert_eq!(history.append(point(5), Utc::now()), 0);
        assert_eq!(history.len(), 6);
        assert_eq!(history.at(1).unwrap().longitude(), 1.0);

        history.clear();
        assert_eq!(history.retention(), Retention::Live);
        assert!(history.last_write().is_none());
        for i in 0..5 {
            history.append(point(i), Utc::now());
        }
        assert_eq!(lngs(&history), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_at_and_path_prefix_are_bounds_checked() {
        let mut history = TrackHistory::new(10);
        assert!(history.path_prefix(5).is_empty());
        for i in 0..4 {
            history.append(point(i), Utc::now());
        }
        assert!(history.at(4).is_none());
        assert_eq!(history.at(1).unwrap().longitude(), 1.0);
        assert_eq!(history.path_prefix(1).len(), 2);
        assert_eq!(history.path_prefix(usize::MAX).len(), 4);
    }
}
