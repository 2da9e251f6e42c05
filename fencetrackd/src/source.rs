//! Where replay history comes from.

use std::fmt;
use std::path::PathBuf;

use log::info;

use crate::error::Result;
use crate::http::HistoryFetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistorySource {
    File(PathBuf),
    Http(String),
}

impl HistorySource {
    /// `http://` and `https://` locations are fetched, anything else is a path.
    pub fn resolve(location: &str) -> Self {
        let location = location.trim();
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            HistorySource::Http(location.to_string())
        } else {
            HistorySource::File(PathBuf::from(location))
        }
    }

    /// Read the whole log.
    pub async fn load(&self, fetcher: &HistoryFetcher, now_ms: i64) -> Result<String> {
        let text = match self {
            HistorySource::File(path) => tokio::fs::read_to_string(path).await?,
            HistorySource::Http(url) => fetcher.fetch(url, now_ms).await?,
        };
        info!("[HistorySource] Loaded {} lines from {}", text.lines().count(), self);
        Ok(text)
    }
}

impl fmt::Display for HistorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistorySource::File(path) => write!(f, "{}", path.display()),
            HistorySource::Http(url) => write!(f, "{}", url),
        }
    }
}
