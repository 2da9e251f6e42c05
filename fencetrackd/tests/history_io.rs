//! Recorder and history-source round trips on real files.
//!
//! Run with: `cargo test -p fencetrackd --test history_io`

use std::io::Write;

use fencetrack::{
    FenceConfig, HistoryFilter, ManualClock, Mode, SampleNormalizer, TrackerConfig,
    TrackerSession,
};
use fencetrackd::{build_client, HistoryFetcher, HistorySource, Recorder};
use serde_json::json;

const T0: i64 = 1_709_280_000_000; // 2024-03-01T08:00:00Z

fn yard_session() -> TrackerSession {
    let config = TrackerConfig {
        fences: vec![FenceConfig::new(
            "yard",
            vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0]],
        )],
        ..TrackerConfig::default()
    };
    TrackerSession::new(config, Box::new(ManualClock::from_millis(T0))).expect("valid config")
}

#[tokio::test]
async fn recorded_points_replay_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.txt");

    let mut live = yard_session();
    let offset = SampleNormalizer::from_config(live.config()).offset();
    let mut recorder = Recorder::open(&path, offset).await.unwrap();

    let samples = [
        json!({"lng": 5.0, "lat": 5.0, "timestamp": T0, "speed_ms": 1.5, "device_id": "unit-1"}),
        json!({"lng": 20.0, "lat": 5.0, "timestamp": T0 + 1000, "speed_ms": 2.0, "device_id": "unit-1"}),
        json!({"lng": 6.0, "lat": 6.0, "timestamp": T0 + 2000, "device_id": "unit-2"}),
    ];
    for sample in &samples {
        let point = live.handle_incoming_point(sample).cloned().unwrap();
        recorder.record(&point).await.unwrap();
    }
    assert_eq!(recorder.written(), 3);

    let fetcher = HistoryFetcher::new(build_client().unwrap());
    let source = HistorySource::resolve(path.to_str().unwrap());
    let text = source.load(&fetcher, T0).await.unwrap();
    assert_eq!(text.lines().count(), 3);

    let mut replay = yard_session();
    let loaded = replay
        .enter_replay(&text, &HistoryFilter::for_device("unit-1"))
        .unwrap();
    assert_eq!(loaded, 2);
    assert_eq!(replay.mode(), Mode::Replay);

    for (replayed, original) in replay.history().iter().zip(live.history().iter()) {
        assert_eq!(replayed.position(), original.position());
        assert_eq!(replayed.timestamp(), original.timestamp());
        assert_eq!(replayed.speed(), original.speed());
        assert_eq!(replayed.inside_fence(), original.inside_fence());
        assert_eq!(replayed.device_id(), "unit-1");
        assert_eq!(replayed.raw(), original.raw());
    }
}

#[tokio::test]
async fn recorder_appends_to_existing_log() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"timestamp":"2024/03/01 16:00:00","lng":1,"lat":1,"isInsideFence":true,"speed":0,"deviceId":"old","raw":{{}}}}"#
    )
    .unwrap();

    let mut session = yard_session();
    let offset = SampleNormalizer::from_config(session.config()).offset();
    let mut recorder = Recorder::open(file.path(), offset).await.unwrap();
    let point = session
        .handle_incoming_point(&json!({"lng": 2.0, "lat": 2.0, "timestamp": T0}))
        .cloned()
        .unwrap();
    recorder.record(&point).await.unwrap();

    let text = std::fs::read_to_string(file.path()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let appended: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(appended["timestamp"], "2024/03/01 16:00:00");
    assert_eq!(appended["deviceId"], "device");
    assert_eq!(appended["isInsideFence"], true);
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = HistoryFetcher::new(build_client().unwrap());
    let source = HistorySource::resolve(dir.path().join("absent.txt").to_str().unwrap());
    let err = source.load(&fetcher, T0).await.unwrap_err();
    assert!(matches!(err, fencetrackd::DaemonError::Io(_)));
}
