//! Live/replay arbitration.
//!
//! Exactly one driver owns the displayed cursor: in [`Mode::Live`] every
//! ingested sample re-anchors it, in [`Mode::Replay`] only the playback
//! engine moves it.

use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Live,
    Replay,
}

#[derive(Debug)]
pub struct ModeController {
    mode: Mode,
}

impl Default for ModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeController {
    pub fn new() -> Self {
        Self { mode: Mode::Live }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether live samples should move the cursor.
    pub fn follows_live(&self) -> bool {
        self.mode == Mode::Live
    }

    /// Switch modes. Returns `false` when already in `mode`.
    pub fn switch_to(&mut self, mode: Mode) -> bool {
        if self.mode == mode {
            return false;
        }
        info!("[ModeController] {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        true
    }
}
