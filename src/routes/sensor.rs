//! `POST /sensor-data` — telemetry ingress on the bridge.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

/// `POST /sensor-data` — body `{espId, DHT22_Temp, DHT22_Humidity, DS18B20_Temp}`.
///
/// Answers as soon as the payload validates; forwarding to the final server
/// runs afterwards and cannot change this response. The body is parsed by
/// hand so that non-JSON bodies get the same 400 as incomplete ones.
pub async fn sensor_data(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let Some(ref ingress) = state.ingress else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Telemetry ingress disabled"})),
        );
    };

    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    match ingress.ingest(&payload) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"success": true, "message": "Sensor data received"})),
        ),
        Err(e) => {
            warn!("Rejected sensor payload: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": "Invalid sensor data"})),
            )
        }
    }
}
