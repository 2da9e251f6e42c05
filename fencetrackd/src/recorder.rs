//! Append-only history recorder.
//!
//! Writes one JSON history record per live point, in the same format
//! `enter_replay` loads.

use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use fencetrack::{HistoryRecord, TrackPoint};
use log::info;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

pub struct Recorder {
    path: PathBuf,
    file: File,
    offset: FixedOffset,
    written: usize,
}

impl Recorder {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: &Path, offset: FixedOffset) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!("[Recorder] Appending history to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
            written: 0,
        })
    }

    pub async fn record(&mut self, point: &TrackPoint) -> Result<()> {
        let mut line = HistoryRecord::from_point(point, self.offset).to_line()?;
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written since opening.
    pub fn written(&self) -> usize {
        self.written
    }
}
