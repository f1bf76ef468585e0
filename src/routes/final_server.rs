//! Final server, the mobile app's backend side of the relay.
//!
//! - `POST /testing-esp` proxies a command to the gateway's `/send-command`
//!   and collapses every outcome to `success` or `error`; the app cannot tell
//!   an unknown device from a dead broker.
//! - `POST /receive-sensor-data` is where the bridge forwards readings. It
//!   only logs them; storage belongs to whatever sits behind this service.

use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::FinalServerConfig;
use crate::telemetry::SensorReading;

#[derive(Clone)]
pub struct FinalServerState {
    http: reqwest::Client,
    send_command_url: String,
    start_time: Instant,
}

impl FinalServerState {
    pub fn new(config: &FinalServerConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base = config.gateway_url.trim_end_matches('/');
        Ok(Self {
            http,
            send_command_url: format!("{base}/send-command"),
            start_time: Instant::now(),
        })
    }

    /// Forward `{esp_id, command}` to the gateway; `true` on a 2xx answer.
    async fn relay_command(&self, esp_id: &Value, command: &Value) -> bool {
        let resp = self
            .http
            .post(&self.send_command_url)
            .json(&json!({"esp_id": esp_id, "command": command}))
            .send()
            .await;
        match resp {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                warn!(%esp_id, %status, body = %body, "Gateway rejected command");
                false
            }
            Err(e) => {
                warn!(%esp_id, "Gateway unreachable: {e}");
                false
            }
        }
    }
}

pub fn router(state: FinalServerState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/testing-esp", post(testing_esp))
        .route("/receive-sensor-data", post(receive_sensor_data))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<FinalServerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "gateway": state.send_command_url,
    }))
}

/// `POST /testing-esp` — body `{command, esp_id}`.
///
/// `200 {message:"success"}` when the gateway accepted the command,
/// `500 {message:"error"}` otherwise.
pub async fn testing_esp(
    State(state): State<FinalServerState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let error = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"message": "error"})),
    );
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        warn!("Rejected /testing-esp body that is not JSON");
        return error;
    };

    if state
        .relay_command(&payload["esp_id"], &payload["command"])
        .await
    {
        info!(esp_id = %payload["esp_id"], command = %payload["command"], "Command relayed");
        (StatusCode::OK, Json(json!({"message": "success"})))
    } else {
        error
    }
}

/// `POST /receive-sensor-data` — a reading forwarded by the bridge.
///
/// The forwarded `timestamp` is kept when present and well-formed.
pub async fn receive_sensor_data(body: Bytes) -> (StatusCode, Json<Value>) {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let timestamp = payload
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

    match SensorReading::from_payload(&payload, timestamp) {
        Ok(reading) => {
            info!(
                esp_id = %reading.esp_id,
                dht22_temp = reading.dht22_temp,
                dht22_humidity = reading.dht22_humidity,
                ds18b20_temp = reading.ds18b20_temp,
                timestamp = %reading.timestamp,
                "Received sensor data"
            );
            (StatusCode::OK, Json(json!({"success": true})))
        }
        Err(e) => {
            warn!("Rejected forwarded sensor data: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": "Missing sensor data"})),
            )
        }
    }
}
