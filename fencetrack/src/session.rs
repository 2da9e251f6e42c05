//! # Tracker Session
//!
//! The context object that owns every component of one tracked subject:
//! fences, normalizer, history, watchdog, playback engine and mode flag.
//!
//! ## Architecture
//!
//! Hosts feed the session three kinds of input, all on one thread:
//! - inbound transport messages (`handle_message`, `handle_incoming_point`)
//! - operator commands (`play`, `enter_replay`, `set_custom_fence`, ...)
//! - time, via `advance`, which fires due playback ticks and watchdog checks
//!
//! Each handler runs to completion before the next one starts. Anything the
//! host should react to (render a frame, show a banner, log a device reply)
//! is queued as a [`TrackerEvent`] and collected with `drain_events`.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Display;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{OptionExt, Result, TrackError};
use crate::geofence::FenceSet;
use crate::history::{Retention, TrackHistory};
use crate::history_log::{parse_history_log, ExportRecord, HistoryFilter};
use crate::mode::{Mode, ModeController};
use crate::nmea::parse_sentence;
use crate::normalize::SampleNormalizer;
use crate::playback::{PlaybackEngine, PlaybackState, RenderFrame, Tick};
use crate::scheduler::{Scheduler, TimerQueue};
use crate::transform::{resolve_conversion, Conversion, ConversionSource};
use crate::watchdog::{Connectivity, OfflineWatchdog};
use crate::{LngLat, TrackPoint};

// ============================================================================
// Events
// ============================================================================

/// Notifications for the host, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum TrackerEvent {
    /// Draw the marker and path for a cursor position
    Frame(RenderFrame),
    /// Playback started, paused, or changed speed
    Playback(PlaybackState),
    /// Playback reached the last point and paused
    PlaybackFinished,
    ConnectivityChanged(Connectivity),
    TransportStatus { connected: bool },
    /// A live sample is on the other side of the fence from the previous one
    #[serde(rename_all = "camelCase")]
    FenceCrossed {
        entered: bool,
        fence: Option<String>,
        position: LngLat,
    },
    DeviceDiscovered(String),
    ModeChanged(Mode),
    /// Center the view on a converted position
    Focus {
        position: LngLat,
        source: ConversionSource,
    },
    /// Device reply to a forwarded command, passed through untouched
    CommandResult(String),
    HistoryCleared,
}

/// A command to publish on the control topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundCommand {
    pub topic: String,
    pub payload: Value,
}

// ============================================================================
// Session
// ============================================================================

pub struct TrackerSession {
    config: TrackerConfig,
    clock: Box<dyn Clock>,
    timers: TimerQueue,

    fences: FenceSet,
    normalizer: SampleNormalizer,
    history: TrackHistory,
    /// Live buffer set aside while a replay set is shown
    parked_live: Option<TrackHistory>,
    watchdog: OfflineWatchdog,
    playback: PlaybackEngine,
    modes: ModeController,

    devices: BTreeSet<String>,
    tracking: bool,
    transport_connected: bool,
    /// Fence flag of the previous live sample, for crossing detection
    last_live_inside: Option<bool>,

    events: VecDeque<TrackerEvent>,
}

impl TrackerSession {
    /// Create a session. Fails if the configuration is invalid.
    pub fn new(config: TrackerConfig, clock: Box<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let timers = TimerQueue::new(clock.now_ms());
        let session = Self {
            fences: FenceSet::from_config(&config.fences),
            normalizer: SampleNormalizer::from_config(&config),
            history: TrackHistory::new(config.history_capacity),
            parked_live: None,
            watchdog: OfflineWatchdog::new(config.offline_threshold(), config.watchdog_interval()),
            playback: PlaybackEngine::from_config(&config),
            modes: ModeController::new(),
            devices: BTreeSet::new(),
            tracking: false,
            transport_connected: false,
            last_live_inside: None,
            events: VecDeque::new(),
            timers,
            clock,
            config,
        };
        info!(
            "[TrackerSession] Created with {} fences, capacity {}",
            session.fences.len(),
            session.history.capacity()
        );
        Ok(session)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn history(&self) -> &TrackHistory {
        &self.history
    }

    pub fn fences(&self) -> &FenceSet {
        &self.fences
    }

    pub fn timers(&self) -> &TimerQueue {
        &self.timers
    }

    pub fn mode(&self) -> Mode {
        self.modes.mode()
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    pub fn is_transport_connected(&self) -> bool {
        self.transport_connected
    }

    pub fn connectivity(&self) -> Connectivity {
        self.watchdog.state()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state(self.history.len())
    }

    /// Every device seen live or in a loaded log.
    pub fn device_ids(&self) -> &BTreeSet<String> {
        &self.devices
    }

    /// Frame at the current cursor.
    pub fn current_frame(&self) -> Option<RenderFrame> {
        RenderFrame::at(&self.history, self.playback.cursor(), self.modes.mode())
    }

    /// Take all queued events.
    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        self.events.drain(..).collect()
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Normalize and record one live sample.
    ///
    /// Malformed payloads are dropped and `None` is returned. In replay the
    /// point goes to the parked live buffer and the shown set is untouched.
    pub fn handle_incoming_point(&mut self, raw: &Value) -> Option<&TrackPoint> {
        let now = self.clock.now();
        let Some(point) = self.normalizer.normalize(raw, &self.fences, now) else {
            debug!("[TrackerSession] Dropped malformed sample");
            return None;
        };

        let position = point.position();
        let inside = point.inside_fence();
        let fence_name = if inside && SampleNormalizer::fence_flag(raw).is_none() {
            self.fences
                .containing(position)
                .map(|fence| fence.name().to_string())
        } else {
            None
        };

        if let Some(previous) = self.last_live_inside.replace(inside) {
            if previous != inside {
                info!(
                    "[TrackerSession] Fence {} at {:.6},{:.6}",
                    if inside { "entered" } else { "left" },
                    position.lng,
                    position.lat
                );
                self.events.push_back(TrackerEvent::FenceCrossed {
                    entered: inside,
                    fence: fence_name,
                    position,
                });
            }
        }

        self.register_device(point.device_id());

        match self.parked_live.as_mut() {
            Some(live) => {
                live.append(point, now);
            }
            None => {
                if self.history.append(point, now) > 0 {
                    self.playback.reconcile(self.history.len(), &mut self.timers);
                }
            }
        }

        if let Some(state) = self.watchdog.touch() {
            self.events.push_back(TrackerEvent::ConnectivityChanged(state));
        }

        if self.modes.follows_live() {
            self.playback.sync_to_latest(self.history.len());
            if self.tracking {
                self.emit_frame();
            }
        }

        self.live_history().latest()
    }

    /// Route a transport message: device replies are logged, anything else
    /// is decoded as a sample.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Option<&TrackPoint> {
        if topic == self.config.topics.result {
            let text = String::from_utf8_lossy(payload).into_owned();
            info!("[TrackerSession] Command result: {}", text);
            self.events.push_back(TrackerEvent::CommandResult(text));
            return None;
        }

        match serde_json::from_slice::<Value>(payload) {
            Ok(raw) => self.handle_incoming_point(&raw),
            Err(e) => {
                debug!("[TrackerSession] Undecodable payload on {}: {}", topic, e);
                None
            }
        }
    }

    /// Ingest a raw NMEA sentence from a directly attached receiver.
    pub fn handle_nmea_sentence(&mut self, sentence: &str) -> Option<&TrackPoint> {
        let raw = parse_sentence(sentence, &self.config.default_device_id)?;
        self.handle_incoming_point(&raw)
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    pub fn start_tracking(&mut self) {
        if self.tracking {
            return;
        }
        self.pump();
        self.tracking = true;
        self.watchdog.activate(&mut self.timers);
        info!("[TrackerSession] Tracking started");

        if self.modes.follows_live() && self.playback.sync_to_latest(self.history.len()).is_some() {
            self.emit_frame();
        }
    }

    /// Stop tracking. Also pauses playback.
    pub fn stop_tracking(&mut self) {
        if !self.tracking {
            return;
        }
        self.tracking = false;
        self.watchdog.deactivate(&mut self.timers);
        self.pause();
        info!("[TrackerSession] Tracking stopped");
    }

    // ========================================================================
    // Replay
    // ========================================================================

    /// Load a history log and switch to replay over the matching points.
    ///
    /// Returns how many points were loaded. When nothing matches the
    /// session is left untouched.
    pub fn enter_replay(&mut self, log_text: &str, filter: &HistoryFilter) -> Result<usize> {
        filter.validate()?;

        let loaded = parse_history_log(log_text, &self.normalizer, &self.fences, self.clock.now());
        if loaded.skipped > 0 {
            warn!("[TrackerSession] Skipped {} history lines", loaded.skipped);
        }
        for device in &loaded.device_ids {
            self.register_device(device);
        }

        let points = loaded.into_filtered(filter);
        if points.is_empty() {
            return Err(TrackError::no_data("replay"));
        }
        let count = points.len();

        self.playback.pause(&mut self.timers);
        self.park_live();
        self.history.replace_all(points, Retention::Replay);
        self.switch_mode(Mode::Replay);
        self.playback.reset(&mut self.timers);
        info!("[TrackerSession] Replay loaded {} points", count);

        self.emit_frame();
        self.emit_playback();
        Ok(count)
    }

    /// Return to following live samples. Returns `false` if already live.
    pub fn exit_replay(&mut self) -> bool {
        if !self.switch_mode(Mode::Live) {
            return false;
        }
        self.playback.pause(&mut self.timers);
        if let Some(live) = self.parked_live.take() {
            self.history = live;
            self.playback.reconcile(self.history.len(), &mut self.timers);
        }
        if self.playback.sync_to_latest(self.history.len()).is_some() {
            self.emit_frame();
        }
        self.emit_playback();
        true
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start playback. In live mode this first switches to replay over the
    /// current history, so live syncing and the playback timer never both
    /// drive the cursor.
    pub fn play(&mut self) -> Result<()> {
        self.pump();
        if self.history.is_empty() {
            self.playback.pause(&mut self.timers);
            return Err(TrackError::no_data("playback"));
        }
        if self.modes.follows_live() {
            self.park_live();
            self.switch_mode(Mode::Replay);
        }
        if self.playback.is_playing() {
            return Ok(());
        }
        self.playback.start(self.history.len(), &mut self.timers)?;
        self.emit_frame();
        self.emit_playback();
        Ok(())
    }

    /// Returns whether playback was running.
    pub fn pause(&mut self) -> bool {
        let was_playing = self.playback.pause(&mut self.timers);
        if was_playing {
            self.emit_playback();
        }
        was_playing
    }

    /// Returns the new playing state.
    pub fn toggle_playback(&mut self) -> Result<bool> {
        if self.playback.is_playing() {
            self.pause();
            Ok(false)
        } else {
            self.play()?;
            Ok(true)
        }
    }

    /// Next speed step. Takes effect immediately when playing.
    pub fn cycle_speed(&mut self) -> f64 {
        self.pump();
        let speed = self.playback.cycle_speed(&mut self.timers);
        self.emit_playback();
        speed
    }

    pub fn set_speed(&mut self, multiplier: f64) -> Result<()> {
        self.pump();
        self.playback.set_speed(multiplier, &mut self.timers)?;
        self.emit_playback();
        Ok(())
    }

    /// Move the cursor, clamped into range. `None` on an empty history.
    pub fn jump_to(&mut self, index: usize) -> Option<usize> {
        let index = self.playback.jump_to(index, self.history.len())?;
        self.emit_frame();
        Some(index)
    }

    /// Pause and rewind to the first point.
    pub fn reset_playback(&mut self) {
        self.playback.reset(&mut self.timers);
        self.emit_frame();
        self.emit_playback();
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Fire every timer due at or before `now`. Returns how many fired.
    pub fn advance(&mut self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let mut fired = 0;

        while let Some(id) = self.timers.pop_due(now_ms) {
            fired += 1;
            if self.playback.owns_timer(id) {
                self.on_playback_tick();
            } else if self.watchdog.owns_timer(id) {
                self.on_watchdog_check();
            } else {
                warn!("[TrackerSession] Cancelling orphan timer {:?}", id);
                self.timers.cancel(id);
            }
        }
        fired
    }

    /// `advance` to the clock's current time.
    ///
    /// Commands that arm timers call this first so new timers are measured
    /// from the present, not from the last pump.
    pub fn pump(&mut self) -> usize {
        let now = self.clock.now();
        self.advance(now)
    }

    fn on_playback_tick(&mut self) {
        match self.playback.tick(self.history.len(), &mut self.timers) {
            Tick::Advanced(_) => self.emit_frame(),
            Tick::Finished(_) => {
                self.emit_frame();
                self.events.push_back(TrackerEvent::PlaybackFinished);
                self.emit_playback();
            }
            Tick::Idle => {}
        }
    }

    fn on_watchdog_check(&mut self) {
        // Evaluate at the instant the check was due, not when it was pumped.
        let fired_at = DateTime::from_timestamp_millis(self.timers.now_ms())
            .unwrap_or_else(|| self.clock.now());
        let last_write = self.live_history().last_write();
        if let Some(state) = self.watchdog.check(fired_at, last_write) {
            self.events.push_back(TrackerEvent::ConnectivityChanged(state));
        }
    }

    // ========================================================================
    // History & Fences
    // ========================================================================

    /// Drop all points and return to live mode.
    pub fn clear_history(&mut self) {
        self.playback.pause(&mut self.timers);
        self.parked_live = None;
        self.history.clear();
        self.playback.reconcile(0, &mut self.timers);
        self.last_live_inside = None;
        self.switch_mode(Mode::Live);
        if let Some(state) = self.watchdog.reset() {
            self.events.push_back(TrackerEvent::ConnectivityChanged(state));
        }
        info!("[TrackerSession] History cleared");
        self.events.push_back(TrackerEvent::HistoryCleared);
    }

    /// Every point in order, as export records.
    pub fn export_history(&self) -> Result<Vec<ExportRecord>> {
        self.history.latest().ok_or_no_data("export")?;
        Ok(self.history.iter().map(ExportRecord::from).collect())
    }

    /// Install the operator-drawn fence. Existing points keep their flags.
    pub fn set_custom_fence(&mut self, points: &[[f64; 2]]) -> Result<()> {
        self.fences.set_custom(points)
    }

    pub fn clear_custom_fence(&mut self) -> bool {
        self.fences.clear_custom()
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Take the outcome of an online datum conversion (or `None` if none was
    /// attempted) and focus the view on the result.
    pub fn resolve_gps_position<E: Display>(
        &mut self,
        lng: f64,
        lat: f64,
        online: Option<std::result::Result<LngLat, E>>,
    ) -> Conversion {
        let conversion = resolve_conversion(LngLat::new(lng, lat), online);
        self.events.push_back(TrackerEvent::Focus {
            position: conversion.position,
            source: conversion.source,
        });
        conversion
    }

    pub fn set_transport_connected(&mut self, connected: bool) {
        if self.transport_connected == connected {
            return;
        }
        self.transport_connected = connected;
        if connected {
            info!("[TrackerSession] Transport connected");
        } else {
            warn!("[TrackerSession] Transport disconnected");
        }
        self.events.push_back(TrackerEvent::TransportStatus { connected });
    }

    /// Wrap operator text for the control topic.
    pub fn forward_command(&self, text: &str) -> Result<OutboundCommand> {
        let command = text.trim();
        if command.is_empty() {
            return Err(TrackError::EmptyCommand);
        }
        if !self.transport_connected {
            return Err(TrackError::TransportUnavailable);
        }
        Ok(OutboundCommand {
            topic: self.config.topics.control.clone(),
            payload: json!({ "command": command }),
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// The buffer live samples are appended to.
    fn live_history(&self) -> &TrackHistory {
        self.parked_live.as_ref().unwrap_or(&self.history)
    }

    /// Set the live buffer aside before the shown set becomes a replay set.
    /// Replaying the current history keeps a snapshot of it in place.
    fn park_live(&mut self) {
        if self.parked_live.is_none() {
            self.parked_live = Some(self.history.clone());
        }
    }

    fn register_device(&mut self, device_id: &str) {
        if !self.devices.contains(device_id) {
            self.devices.insert(device_id.to_string());
            self.events
                .push_back(TrackerEvent::DeviceDiscovered(device_id.to_string()));
        }
    }

    fn switch_mode(&mut self, mode: Mode) -> bool {
        let changed = self.modes.switch_to(mode);
        if changed {
            self.events.push_back(TrackerEvent::ModeChanged(mode));
        }
        changed
    }

    fn emit_frame(&mut self) {
        if let Some(frame) = self.current_frame() {
            self.events.push_back(TrackerEvent::Frame(frame));
        }
    }

    fn emit_playback(&mut self) {
        let state = self.playback_state();
        self.events.push_back(TrackerEvent::Playback(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FenceConfig;

    fn session() -> (TrackerSession, ManualClock) {
        let clock = ManualClock::from_millis(1_700_000_000_000);
        let config = TrackerConfig {
            fences: vec![FenceConfig::new(
                "yard",
                vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]],
            )],
            ..TrackerConfig::default()
        };
        let session = TrackerSession::new(config, Box::new(clock.clone())).unwrap();
        (session, clock)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = TrackerConfig {
            history_capacity: 0,
            ..TrackerConfig::default()
        };
        assert!(TrackerSession::new(config, Box::new(ManualClock::from_millis(0))).is_err());
    }

    #[test]
    fn test_live_sample_emits_frame_only_while_tracking() {
        let (mut session, _) = session();
        session.handle_incoming_point(&json!({"lng": 5, "lat": 5}));
        let events = session.drain_events();
        assert!(!events.iter().any(|e| matches!(e, TrackerEvent::Frame(_))));
        assert_eq!(events, vec![TrackerEvent::DeviceDiscovered("device".into())]);

        session.start_tracking();
        let events = session.drain_events();
        assert!(matches!(&events[..], [TrackerEvent::Frame(f)] if f.index == 0));

        session.handle_incoming_point(&json!({"lng": 6, "lat": 6}));
        let events = session.drain_events();
        assert!(matches!(&events[..], [TrackerEvent::Frame(f)] if f.index == 1 && f.path.len() == 2));
    }

    #[test]
    fn test_fence_crossing_names_fence() {
        let (mut session, _) = session();
        session.handle_incoming_point(&json!({"lng": 50, "lat": 50}));
        session.handle_incoming_point(&json!({"lng": 5, "lat": 5}));
        session.handle_incoming_point(&json!({"lng": 5.5, "lat": 5}));
        session.handle_incoming_point(&json!({"lng": 50, "lat": 5, "isInsideFence": false}));

        let crossings: Vec<TrackerEvent> = session
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, TrackerEvent::FenceCrossed { .. }))
            .collect();
        assert_eq!(
            crossings,
            vec![
                TrackerEvent::FenceCrossed {
                    entered: true,
                    fence: Some("yard".into()),
                    position: LngLat::new(5.0, 5.0),
                },
                TrackerEvent::FenceCrossed {
                    entered: false,
                    fence: None,
                    position: LngLat::new(50.0, 5.0),
                },
            ]
        );
    }

    #[test]
    fn test_handle_message_routes_result_topic() {
        let (mut session, _) = session();
        let result_topic = session.config().topics.result.clone();
        assert!(session.handle_message(&result_topic, b"{\"ok\":true}").is_none());
        assert!(session.handle_message("fencetrack/location", b"not json").is_none());
        assert!(session
            .handle_message("fencetrack/location", br#"{"lng":1,"lat":2}"#)
            .is_some());
        let events = session.drain_events();
        assert_eq!(events[0], TrackerEvent::CommandResult("{\"ok\":true}".into()));
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_forward_command() {
        let (mut session, _) = session();
        assert_eq!(session.forward_command("  "), Err(TrackError::EmptyCommand));
        assert_eq!(
            session.forward_command("status"),
            Err(TrackError::TransportUnavailable)
        );
        session.set_transport_connected(true);
        let command = session.forward_command(" status ").unwrap();
        assert_eq!(command.topic, "fencetrack/location/control");
        assert_eq!(command.payload, json!({"command": "status"}));
        assert_eq!(
            session.drain_events(),
            vec![TrackerEvent::TransportStatus { connected: true }]
        );
    }

    #[test]
    fn test_play_in_live_switches_to_replay() {
        let (mut session, _) = session();
        for i in 0..3 {
            session.handle_incoming_point(&json!({"lng": i, "lat": 1}));
        }
        session.drain_events();

        session.play().unwrap();
        assert_eq!(session.mode(), Mode::Replay);
        assert!(session.playback_state().is_playing);
        assert_eq!(session.playback_state().cursor_index, 0);

        assert!(session.exit_replay());
        assert!(!session.playback_state().is_playing);
        assert_eq!(session.playback_state().cursor_index, 2);
        assert_eq!(session.timers().active_count(), 0);
    }

    #[test]
    fn test_clear_history_returns_to_live() {
        let (mut session, _) = session();
        session.handle_incoming_point(&json!({"lng": 1, "lat": 1}));
        session.play().unwrap();
        session.clear_history();
        assert_eq!(session.mode(), Mode::Live);
        assert!(session.history().is_empty());
        assert!(session.history().last_write().is_none());
        assert_eq!(session.timers().active_count(), 0);
        assert_eq!(session.export_history(), Err(TrackError::no_data("export")));
        assert!(session.drain_events().contains(&TrackerEvent::HistoryCleared));
    }

    #[test]
    fn test_custom_fence_does_not_reclassify() {
        let (mut session, _) = session();
        session.handle_incoming_point(&json!({"lng": 100.5, "lat": 30.5}));
        session
            .set_custom_fence(&[[100.0, 30.0], [100.0, 31.0], [101.0, 31.0], [101.0, 30.0]])
            .unwrap();
        session.handle_incoming_point(&json!({"lng": 100.5, "lat": 30.5}));
        let flags: Vec<bool> = session.history().iter().map(TrackPoint::inside_fence).collect();
        assert_eq!(flags, vec![false, true]);
        assert!(session.clear_custom_fence());
    }

    #[test]
    fn test_resolve_gps_position_focuses() {
        let (mut session, _) = session();
        let conversion = session.resolve_gps_position::<String>(-0.1278, 51.5074, None);
        assert_eq!(conversion.position, LngLat::new(-0.1278, 51.5074));
        assert_eq!(
            session.drain_events(),
            vec![TrackerEvent::Focus {
                position: LngLat::new(-0.1278, 51.5074),
                source: ConversionSource::Offline,
            }]
        );
    }

    #[test]
    fn test_events_serialize_tagged() {
        let event = TrackerEvent::ConnectivityChanged(Connectivity::Offline);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "connectivityChanged", "data": "offline"})
        );
        assert_eq!(
            serde_json::to_value(TrackerEvent::HistoryCleared).unwrap(),
            json!({"event": "historyCleared"})
        );
    }
}
