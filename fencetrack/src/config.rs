//! Tracker configuration.

use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};

/// A named fence polygon as `[lng, lat]` vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FenceConfig {
    pub name: String,
    pub points: Vec<[f64; 2]>,
}

impl FenceConfig {
    pub fn new(name: &str, points: Vec<[f64; 2]>) -> Self {
        Self {
            name: name.to_string(),
            points,
        }
    }
}

/// Message-transport topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Live position samples
    pub data: String,
    /// Operator commands forwarded to the device
    pub control: String,
    /// Device replies to forwarded commands
    pub result: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            data: "fencetrack/location".to_string(),
            control: "fencetrack/location/control".to_string(),
            result: "fencetrack/location/control/result".to_string(),
        }
    }
}

/// Configuration for a tracker session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum points retained by live ingestion.
    /// Default: 2000
    pub history_capacity: usize,

    /// Silence after the last sample before the subject is reported offline.
    /// Default: 30000 ms
    pub offline_threshold_ms: u64,

    /// How often the offline watchdog checks for silence.
    /// Default: 5000 ms
    pub watchdog_interval_ms: u64,

    /// Playback tick period at 1x.
    /// Default: 1000 ms
    pub base_tick_ms: u64,

    /// Ordered playback speed multipliers cycled by the speed control.
    /// Default: [0.5, 1, 2, 5]
    pub speed_steps: Vec<f64>,

    /// Multiplier selected at start-up. Must be one of `speed_steps`.
    /// Default: 1.0
    pub default_speed: f64,

    /// Device id used when a sample carries none.
    /// Default: "device"
    pub default_device_id: String,

    /// Offset of naive timestamps and of `displayTime`, in minutes east of UTC.
    /// Default: 480 (UTC+08:00, the offset the device publisher stamps)
    pub utc_offset_minutes: i32,

    /// Fixed fences. An operator-drawn fence can be added at runtime.
    pub fences: Vec<FenceConfig>,

    pub topics: TopicConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 2000,
            offline_threshold_ms: 30_000,
            watchdog_interval_ms: 5_000,
            base_tick_ms: 1_000,
            speed_steps: vec![0.5, 1.0, 2.0, 5.0],
            default_speed: 1.0,
            default_device_id: "device".to_string(),
            utc_offset_minutes: 480,
            fences: Vec::new(),
            topics: TopicConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a JSON configuration document. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|e| TrackError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the components rely on.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(config_error("history_capacity must be positive"));
        }
        if self.offline_threshold_ms == 0 || self.watchdog_interval_ms == 0 {
            return Err(config_error("watchdog intervals must be positive"));
        }
        if self.base_tick_ms == 0 {
            return Err(config_error("base_tick_ms must be positive"));
        }
        if self.speed_steps.is_empty() {
            return Err(config_error("speed_steps must not be empty"));
        }
        if self.speed_steps.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(config_error("speed_steps must be positive"));
        }
        if !self.speed_steps.contains(&self.default_speed) {
            return Err(config_error("default_speed must be one of speed_steps"));
        }
        if self.default_device_id.trim().is_empty() {
            return Err(config_error("default_device_id must not be empty"));
        }
        if self.utc_offset().is_none() {
            return Err(config_error("utc_offset_minutes out of range"));
        }
        let topics = [&self.topics.data, &self.topics.control, &self.topics.result];
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(config_error("topics must not be empty"));
        }
        if let Some(fence) = self.fences.iter().find(|f| f.points.len() < 3) {
            return Err(TrackError::InvalidFence {
                vertices: fence.points.len(),
            });
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_millis(self.offline_threshold_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn base_tick(&self) -> Duration {
        Duration::from_millis(self.base_tick_ms)
    }
}

fn config_error(message: &str) -> TrackError {
    TrackError::Config {
        message: message.to_string(),
    }
}
