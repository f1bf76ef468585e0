//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `ESP_RELAY_GATEWAY_LISTEN`,
//!    `ESP_RELAY_BRIDGE_LISTEN`, `ESP_RELAY_FINAL_LISTEN`,
//!    `ESP_RELAY_GATEWAY_URL`, `ESP_RELAY_FORWARD_URL`,
//!    `ESP_RELAY_MQTT_HOST`, `ESP_RELAY_MQTT_PORT`
//! 2. **Config file** — path via `--config <path>`, or `esp-relay.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy. Every process reads the same
//! file and only looks at the sections it needs:
//!
//! ```toml
//! [gateway]
//! listen = "0.0.0.0:8001"
//!
//! [bridge]
//! listen = "0.0.0.0:8002"
//!
//! [final_server]
//! listen = "0.0.0.0:8000"
//! gateway_url = "http://127.0.0.1:8001"
//! timeout_secs = 10
//!
//! [realtime]
//! ping_interval_ms = 25000
//! ping_timeout_ms = 20000
//! max_payload = 1000000
//! outbound_buffer = 64
//!
//! [mqtt]
//! host = "broker.hivemq.com"
//! port = 1883
//! client_id = "esp-relay-bridge"
//! topic_prefix = "myESPProject/"
//! keep_alive_secs = 30
//! request_capacity = 10
//! reconnect_delay_secs = 2
//!
//! [forward]
//! url = "http://127.0.0.1:8000/receive-sensor-data"
//! timeout_secs = 10
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "esp-relay.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub final_server: FinalServerConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Socket.IO gateway process (`esp-relay gateway`).
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Socket address to bind (default `0.0.0.0:8001`).
    #[serde(default = "default_gateway_listen")]
    pub listen: String,
}

/// MQTT bridge process (`esp-relay bridge`).
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Socket address to bind (default `0.0.0.0:8002`).
    #[serde(default = "default_bridge_listen")]
    pub listen: String,
}

/// Final server process (`esp-relay final`).
#[derive(Debug, Clone, Deserialize)]
pub struct FinalServerConfig {
    /// Socket address to bind (default `0.0.0.0:8000`).
    #[serde(default = "default_final_listen")]
    pub listen: String,
    /// Base URL of the gateway that `/testing-esp` proxies to.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Timeout for the proxied `/send-command` call in seconds (default 10).
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Engine.IO transport settings advertised in the open handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Milliseconds between server pings (default 25 000).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Milliseconds a client has to answer a ping (default 20 000).
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Largest accepted frame in bytes (default 1 MB).
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    /// Outbound packets queued per connection before emit waits (default 64).
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// MQTT broker connection and topic layout.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname (default `broker.hivemq.com`).
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    /// Broker port (default 1883).
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    /// Prepended to every topic; a missing trailing `/` is added.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Capacity of the client's request queue (default 10).
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    /// Pause after an event-loop error before polling again (default 2).
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

/// Best-effort forwarding of sensor readings to the final server.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    /// Full URL of the final server's `/receive-sensor-data` endpoint.
    #[serde(default = "default_forward_url")]
    pub url: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_gateway_listen() -> String {
    "0.0.0.0:8001".to_string()
}
fn default_bridge_listen() -> String {
    "0.0.0.0:8002".to_string()
}
fn default_final_listen() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_gateway_url() -> String {
    "http://127.0.0.1:8001".to_string()
}
fn default_http_timeout() -> u64 {
    10
}
fn default_ping_interval_ms() -> u64 {
    25_000
}
fn default_ping_timeout_ms() -> u64 {
    20_000
}
fn default_max_payload() -> usize {
    1_000_000
}
fn default_outbound_buffer() -> usize {
    64
}
fn default_mqtt_host() -> String {
    "broker.hivemq.com".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_client_id() -> String {
    "esp-relay-bridge".to_string()
}
fn default_topic_prefix() -> String {
    "myESPProject/".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_request_capacity() -> usize {
    10
}
fn default_reconnect_delay_secs() -> u64 {
    2
}
fn default_forward_url() -> String {
    "http://127.0.0.1:8000/receive-sensor-data".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_gateway_listen(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen: default_bridge_listen(),
        }
    }
}

impl Default for FinalServerConfig {
    fn default() -> Self {
        Self {
            listen: default_final_listen(),
            gateway_url: default_gateway_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            max_payload: default_max_payload(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_mqtt_client_id(),
            topic_prefix: default_topic_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            request_capacity: default_request_capacity(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            url: default_forward_url(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise looks for
    /// `esp-relay.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = if let Some(p) = path {
            Self::from_file(Path::new(p))?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        } else {
            Config::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML document. Missing sections take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(listen) = std::env::var("ESP_RELAY_GATEWAY_LISTEN") {
            self.gateway.listen = listen;
        }
        if let Ok(listen) = std::env::var("ESP_RELAY_BRIDGE_LISTEN") {
            self.bridge.listen = listen;
        }
        if let Ok(listen) = std::env::var("ESP_RELAY_FINAL_LISTEN") {
            self.final_server.listen = listen;
        }
        if let Ok(url) = std::env::var("ESP_RELAY_GATEWAY_URL") {
            self.final_server.gateway_url = url;
        }
        if let Ok(url) = std::env::var("ESP_RELAY_FORWARD_URL") {
            self.forward.url = url;
        }
        if let Ok(host) = std::env::var("ESP_RELAY_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = std::env::var("ESP_RELAY_MQTT_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.mqtt.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.gateway.listen, "0.0.0.0:8001");
        assert_eq!(config.final_server.listen, "0.0.0.0:8000");
        assert_eq!(config.mqtt.host, "broker.hivemq.com");
        assert_eq!(config.mqtt.topic_prefix, "myESPProject/");
        assert_eq!(config.realtime.ping_interval_ms, 25_000);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml(
            r#"
            [mqtt]
            host = "localhost"
            topic_prefix = "lab"

            [forward]
            url = "http://sink:9000/receive-sensor-data"
            "#,
        )
        .unwrap();
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topic_prefix, "lab");
        assert_eq!(config.forward.url, "http://sink:9000/receive-sensor-data");
        assert_eq!(config.forward.timeout_secs, 10);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(Config::from_toml("[mqtt]\nport = \"not-a-port\"").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = Config::load(Some("/nonexistent/esp-relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
