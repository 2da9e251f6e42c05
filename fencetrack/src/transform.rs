//! Offline WGS-84 → GCJ-02 datum conversion.
//!
//! Map tiles for mainland China use the GCJ-02 datum, which is WGS-84 plus an
//! empirical, position-dependent shift. The online conversion service is
//! preferred when reachable; this module is the fallback and must produce the
//! same doubles, so the arithmetic below keeps the reference operation order.

use std::f64::consts::PI;
use std::fmt::Display;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::LngLat;

/// Semi-major axis of the Krasovsky 1940 ellipsoid
const SEMI_MAJOR_AXIS: f64 = 6378245.0;
/// First eccentricity squared of the Krasovsky 1940 ellipsoid
const ECCENTRICITY_SQ: f64 = 0.006_693_421_622_965_943_23;

// Region where the shift applies
const MIN_LNG: f64 = 72.004;
const MAX_LNG: f64 = 137.8347;
const MIN_LAT: f64 = 0.8293;
const MAX_LAT: f64 = 55.8271;

/// Where a converted position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionSource {
    Online,
    Offline,
}

/// A converted position and how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub position: LngLat,
    pub source: ConversionSource,
}

/// True when the shift does not apply and inputs pass through unchanged.
pub fn is_outside_region(lng: f64, lat: f64) -> bool {
    !(MIN_LNG..=MAX_LNG).contains(&lng) || !(MIN_LAT..=MAX_LAT).contains(&lat)
}

/// Convert a WGS-84 position to GCJ-02.
///
/// Positions outside the region are returned unchanged.
///
/// # Example
/// ```
/// use fencetrack::wgs84_to_gcj02;
/// let london = wgs84_to_gcj02(-0.1278, 51.5074);
/// assert_eq!(london.to_array(), [-0.1278, 51.5074]);
/// ```
pub fn wgs84_to_gcj02(lng: f64, lat: f64) -> LngLat {
    if is_outside_region(lng, lat) {
        return LngLat::new(lng, lat);
    }

    let mut d_lat = transform_lat(lng - 105.0, lat - 35.0);
    let mut d_lng = transform_lng(lng - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * PI;
    let mut magic = rad_lat.sin();
    magic = 1.0 - ECCENTRICITY_SQ * magic * magic;
    let sqrt_magic = magic.sqrt();
    d_lat = (d_lat * 180.0)
        / (((SEMI_MAJOR_AXIS * (1.0 - ECCENTRICITY_SQ)) / (magic * sqrt_magic)) * PI);
    d_lng = (d_lng * 180.0) / ((SEMI_MAJOR_AXIS / sqrt_magic) * rad_lat.cos() * PI);

    LngLat::new(lng + d_lng, lat + d_lat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += ((20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0) / 3.0;
    ret += ((20.0 * (y * PI).sin() + 40.0 * ((y / 3.0) * PI).sin()) * 2.0) / 3.0;
    ret += ((160.0 * ((y / 12.0) * PI).sin() + 320.0 * ((y * PI) / 30.0).sin()) * 2.0) / 3.0;
    ret
}

fn transform_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += ((20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0) / 3.0;
    ret += ((20.0 * (x * PI).sin() + 40.0 * ((x / 3.0) * PI).sin()) * 2.0) / 3.0;
    ret += ((150.0 * ((x / 12.0) * PI).sin() + 300.0 * ((x / 30.0) * PI).sin()) * 2.0) / 3.0;
    ret
}

/// Pick the online result when it succeeded, otherwise convert offline.
///
/// `online` is `None` when no online service was available at all.
pub fn resolve_conversion<E: Display>(
    input: LngLat,
    online: Option<std::result::Result<LngLat, E>>,
) -> Conversion {
    match online {
        Some(Ok(position)) if position.is_finite() => Conversion {
            position,
            source: ConversionSource::Online,
        },
        Some(Ok(position)) => {
            warn!(
                "[CoordinateTransform] Online conversion returned non-finite {:?}, using offline",
                position
            );
            offline(input)
        }
        Some(Err(e)) => {
            warn!("[CoordinateTransform] Online conversion failed: {}, using offline", e);
            offline(input)
        }
        None => offline(input),
    }
}

fn offline(input: LngLat) -> Conversion {
    Conversion {
        position: wgs84_to_gcj02(input.lng, input.lat),
        source: ConversionSource::Offline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_region_unchanged() {
        assert_eq!(wgs84_to_gcj02(-74.006, 40.7128), LngLat::new(-74.006, 40.7128));
        assert_eq!(wgs84_to_gcj02(121.0, 60.0), LngLat::new(121.0, 60.0));
        assert_eq!(wgs84_to_gcj02(f64::NAN, 30.0).lat, 30.0);
    }

    #[test]
    fn test_shift_inside_region() {
        // Beijing: GCJ-02 sits a few hundred meters north-east of WGS-84
        let out = wgs84_to_gcj02(116.397428, 39.90923);
        let d_lng = out.lng - 116.397428;
        let d_lat = out.lat - 39.90923;
        assert!(d_lng > 0.004 && d_lng < 0.008, "d_lng = {}", d_lng);
        assert!(d_lat > 0.0005 && d_lat < 0.0025, "d_lat = {}", d_lat);
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let a = wgs84_to_gcj02(121.061722, 40.88588);
        let b = wgs84_to_gcj02(121.061722, 40.88588);
        assert_eq!(a.lng.to_bits(), b.lng.to_bits());
        assert_eq!(a.lat.to_bits(), b.lat.to_bits());
    }

    #[test]
    fn test_resolve_prefers_online() {
        let input = LngLat::new(121.0, 40.0);
        let online = LngLat::new(121.01, 40.002);

        let result = resolve_conversion::<String>(input, Some(Ok(online)));
        assert_eq!(result.source, ConversionSource::Online);
        assert_eq!(result.position, online);

        let result = resolve_conversion(input, Some(Err("timeout")));
        assert_eq!(result.source, ConversionSource::Offline);
        assert_eq!(result.position, wgs84_to_gcj02(121.0, 40.0));

        let result = resolve_conversion::<String>(input, None);
        assert_eq!(result.source, ConversionSource::Offline);

        let result =
            resolve_conversion::<String>(input, Some(Ok(LngLat::new(f64::NAN, 40.0))));
        assert_eq!(result.source, ConversionSource::Offline);
    }
}
