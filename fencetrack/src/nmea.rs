//! NMEA 0183 position sentences.
//!
//! Produces the same loosely typed payload the device publisher emits, so
//! a serial receiver can feed the session without a publisher in between.

use log::debug;
use serde_json::{json, Map, Value};

const KNOTS_TO_MS: f64 = 0.514444;

/// Parse an `RMC`, `GLL` or `GGA` sentence from any talker.
///
/// Returns `None` for other sentence types, invalid fixes, malformed fields,
/// or a checksum mismatch.
///
/// # Example
/// ```
/// use fencetrack::parse_sentence;
/// let payload = parse_sentence(
///     "$GPGLL,4916.45,N,12311.12,W,225444,A",
///     "rx-1",
/// )
/// .unwrap();
/// assert_eq!(payload["message_type"], "GLL");
/// assert_eq!(payload["latitude"], 49.274167);
/// ```
pub fn parse_sentence(sentence: &str, device_id: &str) -> Option<Value> {
    let sentence = sentence.trim();
    let body = sentence.strip_prefix('$')?;

    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            if !checksum_matches(body, checksum) {
                debug!("[Nmea] Checksum mismatch: {}", sentence);
                return None;
            }
            body
        }
        None => body,
    };

    let parts: Vec<&str> = body.split(',').collect();
    let kind = parts.first()?;
    let message_id = kind.get(kind.len().checked_sub(3)?..)?;
    let mut payload = match message_id {
        "RMC" => parse_rmc(&parts)?,
        "GLL" => parse_gll(&parts)?,
        "GGA" => parse_gga(&parts)?,
        other => {
            debug!("[Nmea] Ignoring sentence type {}", other);
            return None;
        }
    };
    payload.insert("device_id".to_string(), json!(device_id));
    Some(Value::Object(payload))
}

fn checksum_matches(body: &str, checksum: &str) -> bool {
    let Ok(expected) = u8::from_str_radix(checksum.trim(), 16) else {
        return false;
    };
    body.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

fn parse_rmc(parts: &[&str]) -> Option<Map<String, Value>> {
    if parts.len() < 12 || parts[2] != "A" {
        return None;
    }
    let latitude = degrees_minutes(parts[3], parts[4], false)?;
    let longitude = degrees_minutes(parts[5], parts[6], true)?;
    let speed_knots = optional_f64(parts[7])?.unwrap_or(0.0);
    let course = optional_f64(parts[8])?.unwrap_or(0.0);
    let utc_time = hms(parts[1]);
    let utc_date = ymd(parts[9]);

    let mut payload = Map::new();
    payload.insert("message_type".to_string(), json!("RMC"));
    payload.insert("latitude".to_string(), json!(latitude));
    payload.insert("longitude".to_string(), json!(longitude));
    payload.insert("speed_knots".to_string(), json!(speed_knots));
    payload.insert("speed_ms".to_string(), json!(speed_knots * KNOTS_TO_MS));
    payload.insert("course".to_string(), json!(course));
    payload.insert("status".to_string(), json!("A"));
    if let (Some(date), Some(time)) = (&utc_date, &utc_time) {
        payload.insert("timestamp".to_string(), json!(format!("{}T{}Z", date, time)));
    }
    payload.insert("utc_time".to_string(), json!(utc_time));
    payload.insert("utc_date".to_string(), json!(utc_date));
    if let Some(mode) = parts.get(12).filter(|m| !m.is_empty()) {
        payload.insert("mode".to_string(), json!(mode));
    }
    Some(payload)
}

fn parse_gll(parts: &[&str]) -> Option<Map<String, Value>> {
    if parts.len() < 7 || !matches!(parts[6], "A" | "D") {
        return None;
    }
    let latitude = degrees_minutes(parts[1], parts[2], false)?;
    let longitude = degrees_minutes(parts[3], parts[4], true)?;

    let mut payload = Map::new();
    payload.insert("message_type".to_string(), json!("GLL"));
    payload.insert("latitude".to_string(), json!(latitude));
    payload.insert("longitude".to_string(), json!(longitude));
    payload.insert("utc_time".to_string(), json!(hms(parts[5])));
    payload.insert("status".to_string(), json!(parts[6]));
    Some(payload)
}

fn parse_gga(parts: &[&str]) -> Option<Map<String, Value>> {
    if parts.len() < 15 {
        return None;
    }
    let latitude = degrees_minutes(parts[2], parts[3], false)?;
    let longitude = degrees_minutes(parts[4], parts[5], true)?;
    let quality: u32 = optional_parse(parts[6])?.unwrap_or(0);
    // Quality 0 means no fix.
    if quality == 0 {
        return None;
    }

    let mut payload = Map::new();
    payload.insert("message_type".to_string(), json!("GGA"));
    payload.insert("latitude".to_string(), json!(latitude));
    payload.insert("longitude".to_string(), json!(longitude));
    payload.insert("utc_time".to_string(), json!(hms(parts[1])));
    payload.insert("quality".to_string(), json!(quality));
    payload.insert(
        "num_satellites".to_string(),
        json!(optional_parse::<u32>(parts[7])?.unwrap_or(0)),
    );
    payload.insert("hdop".to_string(), json!(optional_f64(parts[8])?.unwrap_or(0.0)));
    payload.insert("altitude".to_string(), json!(optional_f64(parts[9])?.unwrap_or(0.0)));
    Some(payload)
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere → decimal degrees.
fn degrees_minutes(value: &str, hemisphere: &str, is_longitude: bool) -> Option<f64> {
    let degree_digits = if is_longitude { 3 } else { 2 };
    if !value.contains('.') || value.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = value.get(..degree_digits)?.parse().ok()?;
    let minutes: f64 = value.get(degree_digits..)?.parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }
    let mut decimal = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => {}
        "S" | "W" => decimal = -decimal,
        _ => return None,
    }
    Some((decimal * 1e6).round() / 1e6)
}

/// Empty → `Some(None)`, malformed → `None`.
fn optional_parse<T: std::str::FromStr>(field: &str) -> Option<Option<T>> {
    if field.is_empty() {
        Some(None)
    } else {
        field.parse().ok().map(Some)
    }
}

fn optional_f64(field: &str) -> Option<Option<f64>> {
    optional_parse::<f64>(field)
}

/// `hhmmss[.ss]` → `HH:MM:SS`.
fn hms(field: &str) -> Option<String> {
    let digits = field.get(..6)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}:{}:{}", &digits[..2], &digits[2..4], &digits[4..6]))
}

/// `ddmmyy` → `20YY-MM-DD`.
fn ymd(field: &str) -> Option<String> {
    if field.len() != 6 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("20{}-{}-{}", &field[4..6], &field[2..4], &field[..2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}", body, sum)
    }

    #[test]
    fn test_rmc() {
        let sentence = with_checksum(
            "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W",
        );
        let payload = parse_sentence(&sentence, "rx").unwrap();
        assert_eq!(payload["message_type"], "RMC");
        assert_eq!(payload["latitude"], 48.1173);
        assert_eq!(payload["longitude"], 11.516667);
        assert_eq!(payload["speed_knots"], 22.4);
        assert_eq!(payload["timestamp"], "2094-03-23T12:35:19Z");
        assert_eq!(payload["device_id"], "rx");
    }

    #[test]
    fn test_rmc_void_fix_rejected() {
        let sentence = with_checksum("GPRMC,123519,V,4807.038,N,01131.000,E,,,230394,,");
        assert!(parse_sentence(&sentence, "rx").is_none());
    }

    #[test]
    fn test_gga_southern_western() {
        let sentence = with_checksum(
            "GNGGA,092750.000,3342.6618,S,07036.0152,W,1,8,1.03,61.7,M,55.2,M,,",
        );
        let payload = parse_sentence(&sentence, "rx").unwrap();
        assert_eq!(payload["message_type"], "GGA");
        assert_eq!(payload["latitude"], -33.71103);
        assert_eq!(payload["longitude"], -70.600253);
        assert_eq!(payload["num_satellites"], 8);
        assert_eq!(payload["utc_time"], "09:27:50");
        assert!(payload.get("timestamp").is_none());
    }

    #[test]
    fn test_checksum_mismatch_and_garbage() {
        assert!(parse_sentence("$GPGLL,4916.45,N,12311.12,W,225444,A*00", "rx").is_none());
        assert!(parse_sentence("GPGLL,4916.45,N,12311.12,W,225444,A", "rx").is_none());
        assert!(parse_sentence("$GPTXT,01,01,02,ANTSTATUS=OK", "rx").is_none());
        assert!(parse_sentence("$GPGLL,4916,N,12311.12,W,225444,A", "rx").is_none());
        assert!(parse_sentence("$", "rx").is_none());
    }

    #[test]
    fn test_normalizes_into_track_point() {
        use crate::{FenceSet, SampleNormalizer, TrackerConfig};
        let payload = parse_sentence(
            &with_checksum("GPRMC,081836,A,3751.65,S,14507.36,E,000.0,360.0,130998,011.3,E"),
            "rx",
        )
        .unwrap();
        let normalizer = SampleNormalizer::from_config(&TrackerConfig::default());
        let point = normalizer
            .normalize(&payload, &FenceSet::default(), chrono::Utc::now())
            .unwrap();
        assert_eq!(point.latitude(), -37.860833);
        assert_eq!(point.longitude(), 145.122667);
        assert_eq!(point.timestamp_iso(), "2098-09-13T08:18:36.000Z");
        assert_eq!(point.device_id(), "rx");
    }
}
