//! Operator console: one command per stdin line.
//!
//! ```text
//! play | pause | toggle | reset | live | clear | quit
//! speed [x]                      cycle, or select a configured step
//! jump N                         move the cursor
//! replay [device] [start] [end]  load history; start/end are epoch ms or RFC 3339, `-` for open
//! track start|stop
//! export [path]
//! fence x,y x,y x,y ...          draw the custom fence
//! fence clear
//! goto lng lat                   focus a raw GPS position
//! send <text>                    forward a command to the device
//! $GPRMC,...                     feed an NMEA sentence directly
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use chrono::DateTime;
use fencetrack::HistoryFilter;

use crate::error::{DaemonError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Toggle,
    /// `None` cycles to the next step
    Speed(Option<f64>),
    Jump(usize),
    Reset,
    Replay(HistoryFilter),
    Live,
    Track(bool),
    Clear,
    Export(Option<PathBuf>),
    Fence(Vec<[f64; 2]>),
    ClearFence,
    Goto { lng: f64, lat: f64 },
    Send(String),
    Nmea(String),
    Quit,
}

impl FromStr for Command {
    type Err = DaemonError;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.starts_with('$') {
            return Ok(Command::Nmea(line.to_string()));
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("play", []) => Command::Play,
            ("pause", []) => Command::Pause,
            ("toggle", []) => Command::Toggle,
            ("reset", []) => Command::Reset,
            ("live", []) => Command::Live,
            ("clear", []) => Command::Clear,
            ("quit" | "exit", []) => Command::Quit,
            ("speed", []) => Command::Speed(None),
            ("speed", [x]) => Command::Speed(Some(parse_number(x.trim_end_matches('x'))?)),
            ("jump", [n]) => Command::Jump(
                n.parse()
                    .map_err(|_| DaemonError::usage(format!("bad index {:?}", n)))?,
            ),
            ("replay", args) if args.len() <= 3 => Command::Replay(parse_filter(args)?),
            ("track", ["start"]) => Command::Track(true),
            ("track", ["stop"]) => Command::Track(false),
            ("export", []) => Command::Export(None),
            ("export", [path]) => Command::Export(Some(PathBuf::from(path))),
            ("fence", ["clear"]) => Command::ClearFence,
            ("fence", vertices) if !vertices.is_empty() => Command::Fence(
                vertices
                    .iter()
                    .map(|v| parse_vertex(v))
                    .collect::<Result<_>>()?,
            ),
            ("goto", [lng, lat]) => Command::Goto {
                lng: parse_number(lng)?,
                lat: parse_number(lat)?,
            },
            ("send", _) if !rest.is_empty() => Command::Send(rest.to_string()),
            ("", _) => return Err(DaemonError::usage("empty command")),
            _ => return Err(DaemonError::usage(format!("unknown command {:?}", line))),
        };
        Ok(command)
    }
}

fn parse_number(text: &str) -> Result<f64> {
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DaemonError::usage(format!("bad number {:?}", text)))
}

fn parse_vertex(text: &str) -> Result<[f64; 2]> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| DaemonError::usage(format!("bad vertex {:?}, expected lng,lat", text)))?;
    Ok([parse_number(x)?, parse_number(y)?])
}

fn parse_bound(text: &str) -> Result<Option<i64>> {
    if text == "-" {
        return Ok(None);
    }
    if let Ok(ms) = text.parse::<i64>() {
        return Ok(Some(ms));
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| Some(dt.timestamp_millis()))
        .map_err(|_| DaemonError::usage(format!("bad time {:?}", text)))
}

fn parse_filter(args: &[&str]) -> Result<HistoryFilter> {
    let device = match args.first() {
        Some(&"-") | None => None,
        Some(device) => Some(device.to_string()),
    };
    let start = args.get(1).map(|s| parse_bound(s)).transpose()?.flatten();
    let end = args.get(2).map(|s| parse_bound(s)).transpose()?.flatten();
    Ok(HistoryFilter {
        device_id: device,
        start_time_ms: start,
        end_time_ms: end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        line.parse().unwrap()
    }

    #[test]
    fn test_simple_verbs() {
        assert_eq!(parse("play"), Command::Play);
        assert_eq!(parse("  PAUSE "), Command::Pause);
        assert_eq!(parse("speed"), Command::Speed(None));
        assert_eq!(parse("speed 2x"), Command::Speed(Some(2.0)));
        assert_eq!(parse("jump 12"), Command::Jump(12));
        assert_eq!(parse("track stop"), Command::Track(false));
        assert_eq!(parse("export out.json"), Command::Export(Some("out.json".into())));
        assert_eq!(parse("fence clear"), Command::ClearFence);
        assert_eq!(parse("quit"), Command::Quit);
    }

    #[test]
    fn test_replay_filter() {
        assert_eq!(parse("replay"), Command::Replay(HistoryFilter::all()));
        assert_eq!(
            parse("replay truck-7 - 2024-03-01T08:00:00Z"),
            Command::Replay(HistoryFilter {
                device_id: Some("truck-7".into()),
                start_time_ms: None,
                end_time_ms: Some(1_709_280_000_000),
            })
        );
        assert_eq!(
            parse("replay - 1000 2000"),
            Command::Replay(HistoryFilter::all().between(Some(1000), Some(2000)))
        );
        assert!("replay a b".parse::<Command>().is_err());
    }

    #[test]
    fn test_fence_and_goto() {
        assert_eq!(
            parse("fence 0,0 0,10 10,10"),
            Command::Fence(vec![[0.0, 0.0], [0.0, 10.0], [10.0, 10.0]])
        );
        assert!("fence 0,0 nope".parse::<Command>().is_err());
        assert_eq!(
            parse("goto 121.06 40.88"),
            Command::Goto {
                lng: 121.06,
                lat: 40.88
            }
        );
    }

    #[test]
    fn test_send_keeps_text_and_nmea_passthrough() {
        assert_eq!(parse("send  reboot now "), Command::Send("reboot now".into()));
        assert_eq!(
            parse("$GPGLL,4916.45,N,12311.12,W,225444,A"),
            Command::Nmea("$GPGLL,4916.45,N,12311.12,W,225444,A".into())
        );
    }

    #[test]
    fn test_rejects_garbage() {
        for line in ["", "send", "jump", "jump -1", "speed fast", "track maybe", "dance"] {
            assert!(line.parse::<Command>().is_err(), "{:?} should fail", line);
        }
    }
}
