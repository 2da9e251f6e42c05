//! Raw payload → [`TrackPoint`].
//!
//! Publishers disagree on field names, so each logical attribute is resolved
//! from an ordered alias list: the first key holding a non-null value wins,
//! even if that value later fails to coerce.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use log::debug;
use serde_json::{Map, Value};

use crate::config::TrackerConfig;
use crate::geofence::FenceSet;
use crate::{LngLat, TrackPoint};

const LONGITUDE_KEYS: &[&str] = &["longitude", "lng"];
const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const TIME_KEYS: &[&str] = &["time", "timestamp"];
const FENCE_FLAG_KEYS: &[&str] = &["isInsideFence", "insideFence", "inside_fence"];
const DEVICE_KEYS: &[&str] = &["device_id", "deviceId", "device"];

/// Speed aliases with the factor converting each to m/s.
const SPEED_KEYS: &[(&str, f64)] = &[
    ("speed_ms", 1.0),
    ("speed", 1.0),
    ("speed_knots", KNOTS_TO_MS),
    ("speedMps", 1.0),
];

const KNOTS_TO_MS: f64 = 0.514444;

/// Epoch numbers above this are milliseconds, anything else is seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Timestamps carrying their own offset.
const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%:z", "%Y/%m/%d %H:%M:%S%.f%:z"];

/// Timestamps without an offset, read in the configured local offset.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d %H:%M",
];

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Turns loosely typed payloads into track points.
#[derive(Debug, Clone)]
pub struct SampleNormalizer {
    default_device_id: String,
    offset: FixedOffset,
}

impl SampleNormalizer {
    pub fn new(default_device_id: &str, offset: FixedOffset) -> Self {
        Self {
            default_device_id: default_device_id.to_string(),
            offset,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            &config.default_device_id,
            config.utc_offset().unwrap_or_else(|| Utc.fix()),
        )
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Normalize one payload.
    ///
    /// Returns `None` when the payload is not an object or its position is
    /// not a pair of finite numbers. Every other field has a fallback:
    /// time → `now`, speed → 0, device → the configured default, and the
    /// fence flag → classification against `fences`.
    pub fn normalize(
        &self,
        raw: &Value,
        fences: &FenceSet,
        now: DateTime<Utc>,
    ) -> Option<TrackPoint> {
        let Some(object) = raw.as_object() else {
            debug!("[SampleNormalizer] Dropping non-object payload");
            return None;
        };

        let lng = first(object, LONGITUDE_KEYS).and_then(coerce_f64);
        let lat = first(object, LATITUDE_KEYS).and_then(coerce_f64);
        let (Some(lng), Some(lat)) = (lng, lat) else {
            debug!("[SampleNormalizer] Dropping payload without a finite position");
            return None;
        };
        let position = LngLat::new(round_to(lng, 6), round_to(lat, 6));

        let timestamp = first(object, TIME_KEYS)
            .and_then(|value| self.parse_time(value))
            .unwrap_or(now);

        let inside_fence = match Self::fence_flag(raw) {
            Some(flag) => flag,
            None => fences.contains(position),
        };

        Some(TrackPoint::new(
            position,
            timestamp,
            self.display_time(timestamp),
            parse_speed(object),
            inside_fence,
            self.device_id(object),
            raw.clone(),
        ))
    }

    /// A pre-computed fence flag, trusted only when it is a JSON boolean.
    pub fn fence_flag(raw: &Value) -> Option<bool> {
        let object = raw.as_object()?;
        FENCE_FLAG_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_bool))
    }

    /// `YYYY-MM-DD HH:MM:SS` in the configured offset.
    pub fn display_time(&self, timestamp: DateTime<Utc>) -> String {
        timestamp
            .with_timezone(&self.offset)
            .format(DISPLAY_FORMAT)
            .to_string()
    }

    /// Resolve an instant from an epoch number, a numeric string, or a
    /// date-time string.
    pub fn parse_time(&self, value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::Number(n) => from_epoch(n.as_f64()?),
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                if let Ok(epoch) = s.parse::<f64>() {
                    return from_epoch(epoch);
                }
                self.parse_time_str(s)
            }
            _ => None,
        }
    }

    fn parse_time_str(&self, s: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
            return Some(ts.with_timezone(&Utc));
        }
        for format in ZONED_FORMATS {
            if let Ok(ts) = DateTime::parse_from_str(s, format) {
                return Some(ts.with_timezone(&Utc));
            }
        }
        let naive = NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|ts| ts.with_timezone(&Utc))
    }

    fn device_id(&self, object: &Map<String, Value>) -> String {
        let id = match first(object, DEVICE_KEYS) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        };
        if id.is_empty() {
            self.default_device_id.clone()
        } else {
            id
        }
    }
}

/// First alias holding a non-null value.
fn first<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| object.get(*key).filter(|v| !v.is_null()))
}

/// Number or numeric string → finite f64.
fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_speed(object: &Map<String, Value>) -> f64 {
    let speed = SPEED_KEYS
        .iter()
        .find_map(|(key, factor)| {
            object
                .get(*key)
                .filter(|v| !v.is_null())
                .map(|v| coerce_f64(v).map(|s| s * factor))
        })
        .flatten()
        .unwrap_or(0.0);
    let speed = round_to(speed, 2);
    if speed.is_finite() && speed > 0.0 {
        speed
    } else {
        0.0
    }
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value > EPOCH_MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

/// Round to `decimals` places. Values too large to scale are returned as is.
fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}
