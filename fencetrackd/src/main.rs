use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use fencetrack::{SampleNormalizer, SystemClock, TrackError, TrackPoint, TrackerSession};
use fencetrackd::{
    build_client, Cli, Command, DaemonError, DatumClient, HistoryFetcher, HistorySource,
    Recorder, Result, Transport, TransportEvent,
};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::time::MissedTickBehavior;

/// How often due playback ticks and watchdog checks are fired.
const PUMP_INTERVAL: Duration = Duration::from_millis(50);

struct Daemon {
    session: TrackerSession,
    transport: Transport,
    fetcher: HistoryFetcher,
    datum: Option<DatumClient>,
    source: Option<HistorySource>,
    recorder: Option<Recorder>,
    stdout: Stdout,
}

impl Daemon {
    async fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.session.set_transport_connected(true),
            TransportEvent::Disconnected => self.session.set_transport_connected(false),
            TransportEvent::Message { topic, payload } => {
                let point = self.session.handle_message(&topic, &payload).cloned();
                self.record(point).await;
            }
        }
    }

    async fn record(&mut self, point: Option<TrackPoint>) {
        let (Some(point), Some(recorder)) = (point, self.recorder.as_mut()) else {
            return;
        };
        if let Err(e) = recorder.record(&point).await {
            warn!(
                "[Daemon] Recording to {} failed: {}",
                recorder.path().display(),
                e
            );
        }
    }

    /// Run one operator command. Returns `false` on quit.
    async fn on_command(&mut self, command: Command) -> Result<bool> {
        match command {
            Command::Play => self.session.play()?,
            Command::Pause => {
                self.session.pause();
            }
            Command::Toggle => {
                self.session.toggle_playback()?;
            }
            Command::Speed(None) => {
                self.session.cycle_speed();
            }
            Command::Speed(Some(multiplier)) => self.session.set_speed(multiplier)?,
            Command::Jump(index) => {
                self.session
                    .jump_to(index)
                    .ok_or_else(|| TrackError::no_data("jump"))?;
            }
            Command::Reset => self.session.reset_playback(),
            Command::Replay(filter) => {
                let source = self.source.as_ref().ok_or(DaemonError::NoHistorySource)?;
                let text = source
                    .load(&self.fetcher, Utc::now().timestamp_millis())
                    .await?;
                let loaded = self.session.enter_replay(&text, &filter)?;
                info!("[Daemon] Replaying {} points from {}", loaded, source);
            }
            Command::Live => {
                self.session.exit_replay();
            }
            Command::Track(true) => self.session.start_tracking(),
            Command::Track(false) => self.session.stop_tracking(),
            Command::Clear => self.session.clear_history(),
            Command::Export(path) => {
                let records = self.session.export_history()?;
                match path {
                    Some(path) => {
                        tokio::fs::write(&path, serde_json::to_string_pretty(&records)?).await?;
                        info!("[Daemon] Exported {} points to {}", records.len(), path.display());
                    }
                    None => self.emit(&json!({ "event": "export", "data": records })).await?,
                }
            }
            Command::Fence(points) => self.session.set_custom_fence(&points)?,
            Command::ClearFence => {
                self.session.clear_custom_fence();
            }
            Command::Goto { lng, lat } => {
                let online = match &self.datum {
                    Some(datum) => Some(datum.convert(lng, lat).await),
                    None => None,
                };
                self.session.resolve_gps_position(lng, lat, online);
            }
            Command::Send(text) => {
                let command = self.session.forward_command(&text)?;
                self.transport.publish(&command).await?;
            }
            Command::Nmea(sentence) => {
                let point = self.session.handle_nmea_sentence(&sentence).cloned();
                if point.is_none() {
                    return Err(DaemonError::usage("unusable NMEA sentence"));
                }
                self.record(point).await;
            }
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    async fn emit<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        self.stdout.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Print every queued session event as one JSON line.
    async fn flush_events(&mut self) -> Result<()> {
        for event in self.session.drain_events() {
            self.emit(&event).await?;
        }
        self.stdout.flush().await?;
        Ok(())
    }

    async fn report(&mut self, error: DaemonError) -> Result<()> {
        warn!("[Daemon] {}", error);
        self.emit(&json!({ "event": "error", "data": error.to_string() }))
            .await
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.tracker_config()?;
    let offset = SampleNormalizer::from_config(&config).offset();
    let topics = config.topics.clone();
    info!(
        "[Daemon] Starting, broker {}:{}, data topic {}",
        cli.mqtt_host, cli.mqtt_port, topics.data
    );

    let client = build_client()?;
    let recorder = match &cli.record {
        Some(path) => Some(Recorder::open(path, offset).await?),
        None => None,
    };

    let mut daemon = Daemon {
        session: TrackerSession::new(config, Box::new(SystemClock))?,
        transport: Transport::new(cli.mqtt_options(), topics),
        fetcher: HistoryFetcher::new(client.clone()),
        datum: cli.amap_key.as_deref().map(|key| DatumClient::new(client, key)),
        source: cli.history.as_deref().map(HistorySource::resolve),
        recorder,
        stdout: tokio::io::stdout(),
    };
    if cli.track {
        daemon.session.start_tracking();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = daemon.transport.next_event() => daemon.on_transport(event).await,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    let outcome = match line.parse::<Command>() {
                        Ok(command) => daemon.on_command(command).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => daemon.report(e).await?,
                    }
                }
                Ok(None) => {
                    info!("[Daemon] Console closed, continuing headless");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("[Daemon] Console read failed: {}", e);
                    stdin_open = false;
                }
            },
            _ = ticker.tick() => {
                daemon.session.pump();
            }
        }
        daemon.flush_events().await?;
    }

    daemon.session.stop_tracking();
    daemon.flush_events().await?;
    info!("[Daemon] Stopped");
    Ok(())
}
