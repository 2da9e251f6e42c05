//! # fencetrack
//!
//! Live GPS tracking core: turns loosely typed position samples into
//! geofence-classified track points, keeps a bounded time-ordered history,
//! and drives a playback cursor over it.
//!
//! This library provides:
//! - Sample normalization with field alias tables
//! - Ray-casting geofence classification against fixed and operator-drawn fences
//! - A FIFO-bounded track history
//! - A silence-based offline watchdog
//! - A playback engine reconciled against a live/replay mode flag
//! - Offline WGS-84 → GCJ-02 datum conversion
//!
//! All timers go through the [`Scheduler`] trait, so hosts can drive the
//! session from a real event loop while tests advance virtual time.
//!
//! ## Quick Start
//!
//! ```rust
//! use fencetrack::{FenceConfig, ManualClock, TrackerConfig, TrackerSession};
//! use serde_json::json;
//!
//! let config = TrackerConfig {
//!     fences: vec![FenceConfig::new(
//!         "yard",
//!         vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]],
//!     )],
//!     ..TrackerConfig::default()
//! };
//! let clock = ManualClock::from_millis(1_700_000_000_000);
//! let mut session = TrackerSession::new(config, Box::new(clock)).unwrap();
//!
//! session.start_tracking();
//! session.handle_incoming_point(&json!({"lng": 5.0, "lat": 5.0, "speed_ms": 1.2}));
//!
//! let latest = session.history().latest().unwrap();
//! assert!(latest.inside_fence());
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use geo::Coord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackError};

// Time sources
pub mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

// Recurring timers (playback ticks, watchdog checks)
pub mod scheduler;
pub use scheduler::{Scheduler, TimerId, TimerQueue};

// Tracker configuration
pub mod config;
pub use config::{FenceConfig, TopicConfig, TrackerConfig};

// Offline GPS → local datum conversion
pub mod transform;
pub use transform::{wgs84_to_gcj02, Conversion, ConversionSource};

// Point-in-polygon membership
pub mod geofence;
pub use geofence::{is_inside, is_inside_any, Fence, FenceSet};

// Raw payload → TrackPoint
pub mod normalize;
pub use normalize::SampleNormalizer;

// Bounded history store
pub mod history;
pub use history::{Retention, TrackHistory};

// Newline-delimited history logs and export records
pub mod history_log;
pub use history_log::{
    parse_history_log, ExportRecord, HistoryFilter, HistoryRecord, LoadedHistory,
};

// NMEA 0183 sentence parsing
pub mod nmea;
pub use nmea::parse_sentence;

// Silence-based liveness detection
pub mod watchdog;
pub use watchdog::{Connectivity, OfflineWatchdog};

// Playback cursor state machine
pub mod playback;
pub use playback::{PlaybackEngine, PlaybackState, RenderFrame, Tick};

// Live/replay arbitration
pub mod mode;
pub use mode::{Mode, ModeController};

// Context object wiring all components together
pub mod session;
pub use session::{OutboundCommand, TrackerEvent, TrackerSession};

// ============================================================================
// Core Types
// ============================================================================

/// A longitude/latitude pair in degrees.
///
/// # Example
/// ```
/// use fencetrack::LngLat;
/// let point = LngLat::new(121.061722, 40.88588);
/// assert_eq!(point.to_array(), [121.061722, 40.88588]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    /// Create a new position.
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Check if both components are finite.
    pub fn is_finite(&self) -> bool {
        self.lng.is_finite() && self.lat.is_finite()
    }

    /// `[lng, lat]`, the order map surfaces expect.
    pub fn to_array(self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

impl From<[f64; 2]> for LngLat {
    fn from(value: [f64; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<LngLat> for Coord<f64> {
    fn from(value: LngLat) -> Self {
        Coord {
            x: value.lng,
            y: value.lat,
        }
    }
}

impl From<Coord<f64>> for LngLat {
    fn from(value: Coord<f64>) -> Self {
        Self::new(value.x, value.y)
    }
}

/// One normalized, timestamped geolocation sample.
///
/// Track points are only produced by [`SampleNormalizer`] and never change
/// afterwards. In particular `inside_fence` is frozen to the fence set that
/// was active when the sample arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    longitude: f64,
    latitude: f64,
    timestamp: DateTime<Utc>,
    display_time: String,
    /// Meters per second, 2-decimal precision
    speed: f64,
    inside_fence: bool,
    device_id: String,
    raw: Value,
}

impl TrackPoint {
    pub(crate) fn new(
        position: LngLat,
        timestamp: DateTime<Utc>,
        display_time: String,
        speed: f64,
        inside_fence: bool,
        device_id: String,
        raw: Value,
    ) -> Self {
        Self {
            longitude: position.lng,
            latitude: position.lat,
            timestamp,
            display_time,
            speed,
            inside_fence,
            device_id,
            raw,
        }
    }

    /// Replace the pass-through payload, e.g. with a log record's nested
    /// original after normalizing its flattened form.
    pub(crate) fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn position(&self) -> LngLat {
        LngLat::new(self.longitude, self.latitude)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Canonical instant, e.g. `2024-03-01T08:00:00.000Z`.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// `YYYY-MM-DD HH:MM:SS` in the configured display offset.
    pub fn display_time(&self) -> &str {
        &self.display_time
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn inside_fence(&self) -> bool {
        self.inside_fence
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The payload this point was normalized from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lnglat_conversions() {
        let p = LngLat::from([1.5, -2.25]);
        let c: Coord<f64> = p.into();
        assert_eq!(c.x, 1.5);
        assert_eq!(c.y, -2.25);
        assert_eq!(LngLat::from(c), p);
        assert!(!LngLat::new(f64::NAN, 0.0).is_finite());
    }

    #[test]
    fn test_timestamp_iso_uses_millis_and_z() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let point = TrackPoint::new(
            LngLat::new(1.0, 2.0),
            ts,
            "2024-03-01 16:00:00".to_string(),
            0.0,
            false,
            "device".to_string(),
            Value::Null,
        );
        assert_eq!(point.timestamp_iso(), "2024-03-01T08:00:00.000Z");
        assert_eq!(point.timestamp_ms(), ts.timestamp_millis());
    }
}
