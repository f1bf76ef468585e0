//! Error types for the relay.
//!
//! Only [`DispatchError`] and [`IngestError`] ever reach an HTTP caller.
//! [`ForwardError`] is logged by the forwarder and dropped.

use thiserror::Error;

/// Why a command could not be handed to a device's transport.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// `esp_id` or `command` missing or empty.
    #[error("esp_id and command are required")]
    InvalidRequest,
    /// No live registry entry for the device (realtime path only).
    #[error("ESP not connected")]
    NotConnected { esp_id: String },
    /// Socket writer gone, broker connection down, or publish rejected.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Sensor payload rejected at the edge.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Invalid sensor data: missing or invalid `{field}`")]
    InvalidPayload { field: &'static str },
}

/// Downstream forward to the final server failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("forward request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("final server answered {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
