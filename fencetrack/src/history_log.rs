//! Newline-delimited JSON history logs.
//!
//! The recorder appends one [`HistoryRecord`] per live point. Loading reads
//! each line on its own; a bad line is counted and skipped.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TrackError};
use crate::geofence::FenceSet;
use crate::normalize::SampleNormalizer;
use crate::TrackPoint;

/// Device id that disables device filtering.
pub const ALL_DEVICES: &str = "all";

const RECORD_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

// ============================================================================
// Filter
// ============================================================================

/// Which loaded points to keep. Bounds are inclusive epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    pub device_id: Option<String>,
    pub start_time_ms: Option<i64>,
    pub end_time_ms: Option<i64>,
}

impl HistoryFilter {
    /// Keep everything.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_device(device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..Self::default()
        }
    }

    pub fn between(mut self, start_time_ms: Option<i64>, end_time_ms: Option<i64>) -> Self {
        self.start_time_ms = start_time_ms;
        self.end_time_ms = end_time_ms;
        self
    }

    /// Device to match, unless filtering by device is disabled.
    pub fn target_device(&self) -> Option<&str> {
        self.device_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != ALL_DEVICES)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_time_ms, self.end_time_ms) {
            if start > end {
                return Err(TrackError::InvalidFilter {
                    message: format!("start {} is after end {}", start, end),
                });
            }
        }
        Ok(())
    }

    pub fn matches(&self, point: &TrackPoint) -> bool {
        if let Some(device) = self.target_device() {
            if point.device_id() != device {
                return false;
            }
        }
        let ts = point.timestamp_ms();
        if self.start_time_ms.is_some_and(|start| ts < start) {
            return false;
        }
        if self.end_time_ms.is_some_and(|end| ts > end) {
            return false;
        }
        true
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Result of parsing a history log, before filtering.
#[derive(Debug, Clone, Default)]
pub struct LoadedHistory {
    pub points: Vec<TrackPoint>,
    /// Every device seen in the file.
    pub device_ids: BTreeSet<String>,
    /// Lines that were not JSON or had no usable position.
    pub skipped: usize,
}

impl LoadedHistory {
    /// Apply a filter, keeping file order.
    pub fn into_filtered(self, filter: &HistoryFilter) -> Vec<TrackPoint> {
        self.points
            .into_iter()
            .filter(|point| filter.matches(point))
            .collect()
    }
}

/// Parse newline-delimited history records.
///
/// Records carrying a boolean `isInsideFence` keep it; the rest are
/// classified against `fences` once, here.
pub fn parse_history_log(
    text: &str,
    normalizer: &SampleNormalizer,
    fences: &FenceSet,
    now: DateTime<Utc>,
) -> LoadedHistory {
    let mut loaded = LoadedHistory::default();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("[HistoryLog] Skipping line {}: {}", line_no + 1, e);
                loaded.skipped += 1;
                continue;
            }
        };

        let Some(merged) = merge_record(&record) else {
            debug!("[HistoryLog] Skipping line {}: not an object", line_no + 1);
            loaded.skipped += 1;
            continue;
        };

        match normalizer.normalize(&merged, fences, now) {
            Some(point) => {
                let raw = nested_raw(&record).cloned().unwrap_or(record);
                loaded.device_ids.insert(point.device_id().to_string());
                loaded.points.push(point.with_raw(raw));
            }
            None => {
                debug!("[HistoryLog] Skipping line {}: no usable position", line_no + 1);
                loaded.skipped += 1;
            }
        }
    }

    loaded
}

fn nested_raw(record: &Value) -> Option<&Value> {
    record.get("raw").filter(|raw| raw.is_object())
}

/// Flatten a record and its nested `raw` payload into one sample.
/// Top-level fields win.
fn merge_record(record: &Value) -> Option<Value> {
    let top = record.as_object()?;
    let raw = nested_raw(record)
        .and_then(Value::as_object)
        .unwrap_or(top);

    let pick = |sources: &[(&Map<String, Value>, &str)]| -> Option<Value> {
        sources
            .iter()
            .find_map(|(object, key)| object.get(*key).filter(|v| !v.is_null()))
            .cloned()
    };

    let mut merged = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            merged.insert(key.to_string(), value);
        }
    };

    put(
        "longitude",
        pick(&[(top, "lng"), (top, "longitude"), (raw, "longitude"), (raw, "lng")]),
    );
    put(
        "latitude",
        pick(&[(top, "lat"), (top, "latitude"), (raw, "latitude"), (raw, "lat")]),
    );
    put(
        "time",
        pick(&[(top, "timestamp"), (top, "time"), (raw, "time"), (raw, "timestamp")]),
    );
    put(
        "speed",
        pick(&[(top, "speed"), (top, "speed_ms"), (raw, "speed_ms"), (raw, "speed"), (raw, "speedMps")]),
    );
    put("speed_knots", pick(&[(raw, "speed_knots")]));
    put(
        "isInsideFence",
        SampleNormalizer::fence_flag(record)
            .or_else(|| nested_raw(record).and_then(SampleNormalizer::fence_flag))
            .map(Value::Bool),
    );
    put(
        "device_id",
        pick(&[
            (top, "deviceId"),
            (top, "device_id"),
            (raw, "device_id"),
            (raw, "deviceId"),
            (raw, "device"),
        ]),
    );

    Some(Value::Object(merged))
}

// ============================================================================
// Records
// ============================================================================

/// One line of a recorded history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// `YYYY/MM/DD HH:MM:SS` in the recorder's offset
    pub timestamp: String,
    pub lng: f64,
    pub lat: f64,
    pub is_inside_fence: bool,
    pub speed: f64,
    pub device_id: String,
    pub raw: Value,
}

impl HistoryRecord {
    pub fn from_point(point: &TrackPoint, offset: FixedOffset) -> Self {
        Self {
            timestamp: point
                .timestamp()
                .with_timezone(&offset)
                .format(RECORD_TIME_FORMAT)
                .to_string(),
            lng: point.longitude(),
            lat: point.latitude(),
            is_inside_fence: point.inside_fence(),
            speed: point.speed(),
            device_id: point.device_id().to_string(),
            raw: point.raw().clone(),
        }
    }

    /// Serialize as a single JSON line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TrackError::Config {
            message: format!("history record not serializable: {}", e),
        })
    }
}

/// A point as handed to the operator by `export_history`.
///
/// Feeding one back through the normalizer reproduces the point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    /// RFC 3339 instant in UTC
    pub timestamp: String,
    pub display_time: String,
    pub longitude: f64,
    pub latitude: f64,
    pub speed: f64,
    pub is_inside_fence: bool,
    pub device_id: String,
    pub raw: Value,
}

impl From<&TrackPoint> for ExportRecord {
    fn from(point: &TrackPoint) -> Self {
        Self {
            timestamp: point.timestamp_iso(),
            display_time: point.display_time().to_string(),
            longitude: point.longitude(),
            latitude: point.latitude(),
            speed: point.speed(),
            is_inside_fence: point.inside_fence(),
            device_id: point.device_id().to_string(),
            raw: point.raw().clone(),
        }
    }
}
