//! # fencetrackd
//!
//! Runs a [`fencetrack::TrackerSession`] against real collaborators: an MQTT
//! broker for live samples and device commands, a file or HTTP endpoint for
//! replay history, the AMap web service for datum conversion, and stdin/stdout
//! as the operator console and render stream.

pub mod config;
pub mod console;
pub mod error;
pub mod http;
pub mod recorder;
pub mod source;
pub mod transport;

pub use config::Cli;
pub use console::Command;
pub use error::{DaemonError, Result};
pub use http::{build_client, DatumClient, HistoryFetcher};
pub use recorder::Recorder;
pub use source::HistorySource;
pub use transport::{Transport, TransportEvent};
