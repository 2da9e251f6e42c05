//! Command-line configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fencetrack::{TopicConfig, TrackerConfig};
use rumqttc::MqttOptions;

use crate::error::Result;

const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Live tracking and history playback daemon
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long)]
    pub mqtt_username: Option<String>,

    #[arg(long)]
    pub mqtt_password: Option<String>,

    /// MQTT client id
    #[arg(long, default_value = "fencetrackd")]
    pub client_id: String,

    /// Topic carrying live position samples
    #[arg(long, value_name = "TOPIC")]
    pub data_topic: Option<String>,

    /// Topic operator commands are published to
    #[arg(long, value_name = "TOPIC")]
    pub control_topic: Option<String>,

    /// Topic the device answers commands on
    #[arg(long, value_name = "TOPIC")]
    pub result_topic: Option<String>,

    /// History log to replay: a file path or an http(s) URL
    #[arg(long, value_name = "PATH|URL")]
    pub history: Option<String>,

    /// Append every live point to this file as a history record
    #[arg(long, value_name = "FILE")]
    pub record: Option<PathBuf>,

    /// Tracker configuration (JSON). Flags override its topics.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// AMap web service key for online coordinate conversion
    #[arg(long, value_name = "KEY")]
    pub amap_key: Option<String>,

    /// Start tracking immediately
    #[arg(long, default_value_t = false)]
    pub track: bool,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Tracker configuration from `--config` (or defaults) with topic flags applied.
    pub fn tracker_config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::from_json(&std::fs::read_to_string(path)?)?,
            None => TrackerConfig::default(),
        };
        self.apply_topics(&mut config.topics);
        config.validate()?;
        Ok(config)
    }

    fn apply_topics(&self, topics: &mut TopicConfig) {
        if let Some(data) = &self.data_topic {
            topics.data = data.clone();
        }
        if let Some(control) = &self.control_topic {
            topics.control = control.clone();
        }
        if let Some(result) = &self.result_topic {
            topics.result = result.clone();
        }
    }

    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.mqtt_host, self.mqtt_port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.mqtt_username, &self.mqtt_password) {
            options.set_credentials(user, pass);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["fencetrackd"]).unwrap();
        assert_eq!(cli.mqtt_host, "localhost");
        assert_eq!(cli.mqtt_port, 1883);
        assert!(!cli.verbose);

        let config = cli.tracker_config().unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_topic_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"history_capacity": 50, "topics": {{"data": "site/gps", "result": "site/gps/result"}}}}"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from([
            "fencetrackd",
            "--config",
            path.as_str(),
            "--result-topic",
            "override/result",
        ])
        .unwrap();

        let config = cli.tracker_config().unwrap();
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.topics.data, "site/gps");
        assert_eq!(config.topics.control, TopicConfig::default().control);
        assert_eq!(config.topics.result, "override/result");
    }

    #[test]
    fn test_blank_topic_flag_is_rejected() {
        let cli = Cli::try_parse_from(["fencetrackd", "--data-topic", " "]).unwrap();
        assert!(cli.tracker_config().is_err());
    }
}
