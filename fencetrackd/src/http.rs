//! HTTP clients for history logs and online datum conversion.
//!
//! Both share one connection-pooled reqwest `Client` with a request timeout.
//! Neither retries: a failed history fetch is reported to the operator and a
//! failed conversion falls back to the offline transform.

use std::time::Duration;

use fencetrack::LngLat;
use log::{debug, info};
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{DaemonError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const AMAP_CONVERT_URL: &str = "https://restapi.amap.com/v3/assistant/coordinate/convert";

/// Shared client for every HTTP call the daemon makes.
pub fn build_client() -> Result<Client> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    Ok(client)
}

// ============================================================================
// History logs
// ============================================================================

/// Downloads newline-delimited history logs.
pub struct HistoryFetcher {
    client: Client,
}

impl HistoryFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GET the log body. `now_ms` is sent as a `ts` query so intermediate
    /// caches never serve a stale copy.
    pub async fn fetch(&self, url: &str, now_ms: i64) -> Result<String> {
        let response = self
            .client
            .get(url)
            .query(&[("ts", now_ms.to_string())])
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        info!(
            "[HistoryFetcher] Fetched {} bytes from {}",
            body.len(),
            url
        );
        Ok(body)
    }
}

// ============================================================================
// Datum conversion
// ============================================================================

/// AMap coordinate conversion response
#[derive(Debug, Deserialize)]
struct ConvertResponse {
    status: String,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    locations: Option<String>,
}

/// Online WGS-84 → GCJ-02 conversion through the AMap web service.
pub struct DatumClient {
    client: Client,
    key: String,
}

impl DatumClient {
    pub fn new(client: Client, key: &str) -> Self {
        Self {
            client,
            key: key.to_string(),
        }
    }

    pub async fn convert(&self, lng: f64, lat: f64) -> Result<LngLat> {
        let response: ConvertResponse = self
            .client
            .get(AMAP_CONVERT_URL)
            .query(&[
                ("locations", format!("{},{}", lng, lat)),
                ("coordsys", "gps".to_string()),
                ("key", self.key.clone()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let converted = parse_convert_response(response)?;
        debug!(
            "[DatumClient] {:.6},{:.6} -> {:.6},{:.6}",
            lng, lat, converted.lng, converted.lat
        );
        Ok(converted)
    }
}

fn parse_convert_response(response: ConvertResponse) -> Result<LngLat> {
    let bad = |message: String| DaemonError::BadResponse {
        service: "amap",
        message,
    };

    if response.status != "1" {
        return Err(bad(response.info.unwrap_or_else(|| "status 0".to_string())));
    }
    let locations = response
        .locations
        .ok_or_else(|| bad("missing locations".to_string()))?;

    // Batch responses separate pairs with ';', we only ever send one.
    let first = locations.split(';').next().unwrap_or_default();
    let mut parts = first.split(',').map(|part| part.trim().parse::<f64>());
    match (parts.next(), parts.next()) {
        (Some(Ok(lng)), Some(Ok(lat))) if lng.is_finite() && lat.is_finite() => {
            Ok(LngLat::new(lng, lat))
        }
        _ => Err(bad(format!("unparseable locations {:?}", locations))),
    }
}
