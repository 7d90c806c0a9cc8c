//! # Runtime Configuration
//!
//! Source definitions for every configured ingester, loaded from a single
//! JSON file. The file location comes from the `INDEXER_CONFIG` environment
//! variable, with `config.indexer.json` next to the binary as the fallback.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILE_ENV: &str = "INDEXER_CONFIG";
const CONFIG_FILE_NAME: &str = "config.indexer.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed configuration file {path}: {source}")]
    ParseError {
        path: String,
        source: serde_json::Error,
    },
}

/// HTTP method used by a polled REST source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RestMethod {
    #[default]
    Get,
    Post,
}

/// Payload shape a polled REST source returns, selecting the decoder for
/// each record of the response array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Device,
    Post,
    EntityStateChange,
    #[default]
    Json,
}

/// One authenticated WebSocket feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSocketServerConfig {
    pub url: String,
    pub access_token: String,
    /// Event type subscribed to right after authentication.
    #[serde(default = "default_event_type")]
    pub event_type: String,
    /// Regex applied to outbound topics when republishing onto the bus.
    #[serde(default)]
    pub inject_filter: Option<String>,
}

fn default_event_type() -> String {
    "state_changed".to_string()
}

/// One fixed-rate polled REST endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestServerConfig {
    pub url: String,
    #[serde(default)]
    pub method: RestMethod,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub request_body: Option<serde_json::Value>,
    /// Poll period in seconds.
    #[serde(default = "default_poll_period")]
    pub poll_period_secs: u64,
    #[serde(default)]
    pub response_kind: PayloadKind,
    #[serde(default)]
    pub inject_filter: Option<String>,
}

fn default_poll_period() -> u64 {
    60
}

impl RestServerConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }
}

/// One MQTT broker subscription.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MqttBrokerConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub topics: Vec<String>,
    #[serde(default)]
    pub inject_filter: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

/// The whole ingester roster, keyed by logical source name.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MessageIngesterConfig {
    #[serde(default)]
    pub websocket: BTreeMap<String, WebSocketServerConfig>,
    #[serde(default)]
    pub rest: BTreeMap<String, RestServerConfig>,
    #[serde(default)]
    pub mqtt: BTreeMap<String, MqttBrokerConfig>,
}

impl MessageIngesterConfig {
    /// Loads the roster from `INDEXER_CONFIG`, or the default file name in
    /// the current directory when the variable is unset.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE_NAME));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParseError {
            path: path.to_string_lossy().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_full_roster_with_defaults_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "websocket": {{
                    "home": {{"url": "ws://host:8123/api/websocket", "access_token": "tok"}}
                }},
                "rest": {{
                    "devices": {{"url": "http://host/api/devices", "response_kind": "device"}}
                }},
                "mqtt": {{
                    "broker": {{"host": "mqtt.local", "topics": ["sensors/#"]}}
                }}
            }}"#
        )
        .unwrap();

        let config = MessageIngesterConfig::load_from(file.path()).unwrap();
        let ws = &config.websocket["home"];
        assert_eq!(ws.event_type, "state_changed");
        assert!(ws.inject_filter.is_none());

        let rest = &config.rest["devices"];
        assert_eq!(rest.method, RestMethod::Get);
        assert_eq!(rest.poll_period(), Duration::from_secs(60));
        assert_eq!(rest.response_kind, PayloadKind::Device);

        let mqtt = &config.mqtt["broker"];
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topics, vec!["sensors/#"]);
    }

    #[test]
    fn malformed_file_reports_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = MessageIngesterConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = MessageIngesterConfig::load_from(Path::new("/nonexistent/config.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
