//! Playback cursor state machine.
//!
//! The engine never holds or mutates the history; every operation takes the
//! current history length. Its timer is the only thing that moves the cursor
//! in replay mode and must be released on every path that stops playback.

use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackError};
use crate::history::TrackHistory;
use crate::mode::Mode;
use crate::scheduler::{Scheduler, TimerId};
use crate::LngLat;

const SPEED_EPSILON: f64 = 1e-9;

/// Outcome of one playback tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Cursor moved to this index.
    Advanced(usize),
    /// Cursor reached the last index and playback paused.
    Finished(usize),
    /// Not playing; nothing happened.
    Idle,
}

/// Snapshot of the engine for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    /// -1 when the history is empty
    pub cursor_index: i64,
    pub total: usize,
    pub is_playing: bool,
    pub speed_multiplier: f64,
    pub timer_armed: bool,
}

/// What the rendering surface needs to draw one cursor position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub index: usize,
    pub total: usize,
    pub position: LngLat,
    pub inside_fence: bool,
    pub display_time: String,
    pub speed: f64,
    pub device_id: String,
    /// Positions from the first point through `index`
    pub path: Vec<LngLat>,
    pub mode: Mode,
}

impl RenderFrame {
    /// Frame for `index`, or `None` if it is out of range.
    pub fn at(history: &TrackHistory, index: usize, mode: Mode) -> Option<Self> {
        let point = history.at(index)?;
        Some(Self {
            index,
            total: history.len(),
            position: point.position(),
            inside_fence: point.inside_fence(),
            display_time: point.display_time().to_string(),
            speed: point.speed(),
            device_id: point.device_id().to_string(),
            path: history.path_prefix(index),
            mode,
        })
    }
}

#[derive(Debug)]
pub struct PlaybackEngine {
    cursor: usize,
    playing: bool,
    speed_steps: Vec<f64>,
    speed_index: usize,
    base_tick: Duration,
    timer: Option<TimerId>,
}

impl PlaybackEngine {
    /// `speed_steps` must be non-empty; an unknown `default_speed` selects
    /// the first step.
    /// Steps that are not positive and finite are dropped; with none left
    /// the engine runs at 1x.
    pub fn new(base_tick: Duration, speed_steps: Vec<f64>, default_speed: f64) -> Self {
        let speed_steps: Vec<f64> = speed_steps
            .into_iter()
            .filter(|step| step.is_finite() && *step > 0.0)
            .collect();
        let speed_steps = if speed_steps.is_empty() {
            vec![1.0]
        } else {
            speed_steps
        };
        let speed_index = find_speed(&speed_steps, default_speed).unwrap_or(0);
        Self {
            cursor: 0,
            playing: false,
            speed_steps,
            speed_index,
            base_tick,
            timer: None,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            config.base_tick(),
            config.speed_steps.clone(),
            config.default_speed,
        )
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn speed(&self) -> f64 {
        self.speed_steps[self.speed_index]
    }

    pub fn speed_steps(&self) -> &[f64] {
        &self.speed_steps
    }

    pub fn owns_timer(&self, id: TimerId) -> bool {
        self.timer == Some(id)
    }

    /// Tick period at the current speed.
    pub fn tick_period(&self) -> Duration {
        self.base_tick.div_f64(self.speed())
    }

    pub fn state(&self, len: usize) -> PlaybackState {
        PlaybackState {
            cursor_index: if len == 0 { -1 } else { self.cursor as i64 },
            total: len,
            is_playing: self.playing,
            speed_multiplier: self.speed(),
            timer_armed: self.timer.is_some(),
        }
    }

    /// Begin playing. Wraps to the start when the cursor is already at the
    /// last index.
    pub fn start(&mut self, len: usize, scheduler: &mut dyn Scheduler) -> Result<()> {
        if len == 0 {
            self.pause(scheduler);
            return Err(TrackError::no_data("playback"));
        }
        if self.playing {
            return Ok(());
        }
        if self.cursor >= len - 1 {
            self.cursor = 0;
        }
        self.arm(scheduler);
        self.playing = true;
        info!(
            "[PlaybackEngine] Playing from {} of {} at {}x",
            self.cursor,
            len,
            self.speed()
        );
        Ok(())
    }

    /// Stop the timer, keeping the cursor. Returns whether it was playing.
    pub fn pause(&mut self, scheduler: &mut dyn Scheduler) -> bool {
        self.disarm(scheduler);
        let was_playing = std::mem::replace(&mut self.playing, false);
        if was_playing {
            info!("[PlaybackEngine] Paused at {}", self.cursor);
        }
        was_playing
    }

    /// Play if paused, pause if playing. Returns the new playing state.
    pub fn toggle(&mut self, len: usize, scheduler: &mut dyn Scheduler) -> Result<bool> {
        if self.playing {
            self.pause(scheduler);
            Ok(false)
        } else {
            self.start(len, scheduler)?;
            Ok(true)
        }
    }

    /// Advance one step. Auto-pauses on reaching the last index.
    pub fn tick(&mut self, len: usize, scheduler: &mut dyn Scheduler) -> Tick {
        if !self.playing {
            return Tick::Idle;
        }
        if len == 0 {
            self.pause(scheduler);
            return Tick::Idle;
        }
        let last = len - 1;
        self.cursor = (self.cursor + 1).min(last);
        if self.cursor == last {
            self.pause(scheduler);
            info!("[PlaybackEngine] Reached end of history");
            Tick::Finished(self.cursor)
        } else {
            Tick::Advanced(self.cursor)
        }
    }

    /// Move to the next speed step, restarting the timer if playing.
    pub fn cycle_speed(&mut self, scheduler: &mut dyn Scheduler) -> f64 {
        self.speed_index = (self.speed_index + 1) % self.speed_steps.len();
        self.rearm(scheduler);
        self.speed()
    }

    /// Select a specific speed step, restarting the timer if playing.
    pub fn set_speed(&mut self, multiplier: f64, scheduler: &mut dyn Scheduler) -> Result<()> {
        let index = find_speed(&self.speed_steps, multiplier)
            .ok_or(TrackError::UnsupportedSpeed { multiplier })?;
        if index != self.speed_index {
            self.speed_index = index;
            self.rearm(scheduler);
        }
        Ok(())
    }

    /// Clamp into range and move the cursor. No-op on an empty history.
    pub fn jump_to(&mut self, index: usize, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        self.cursor = index.min(len - 1);
        Some(self.cursor)
    }

    /// Move the cursor to the newest point.
    pub fn sync_to_latest(&mut self, len: usize) -> Option<usize> {
        self.jump_to(usize::MAX, len)
    }

    /// Pause and rewind to the first point.
    pub fn reset(&mut self, scheduler: &mut dyn Scheduler) {
        self.pause(scheduler);
        self.cursor = 0;
    }

    /// Keep the cursor valid after the history shrank.
    pub fn reconcile(&mut self, len: usize, scheduler: &mut dyn Scheduler) {
        if len == 0 {
            self.pause(scheduler);
            self.cursor = 0;
        } else if self.cursor >= len {
            self.cursor = len - 1;
        }
    }

    fn arm(&mut self, scheduler: &mut dyn Scheduler) {
        self.disarm(scheduler);
        self.timer = Some(scheduler.schedule_repeating(self.tick_period()));
    }

    fn disarm(&mut self, scheduler: &mut dyn Scheduler) {
        if let Some(timer) = self.timer.take() {
            scheduler.cancel(timer);
        }
    }

    fn rearm(&mut self, scheduler: &mut dyn Scheduler) {
        if self.playing {
            debug!("[PlaybackEngine] Restarting timer at {}x", self.speed());
            self.arm(scheduler);
        }
    }
}

fn find_speed(steps: &[f64], multiplier: f64) -> Option<usize> {
    steps
        .iter()
        .position(|step| (step - multiplier).abs() < SPEED_EPSILON)
}
