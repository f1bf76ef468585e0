//! `POST /send-command` — hand a command to a device's transport.

use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::DispatchError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SendCommandRequest {
    #[serde(default)]
    pub esp_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

/// `POST /send-command` — body `{esp_id, command}`.
///
/// - `200 {success:true, message:"Command sent to <id>"}` once emitted or published
/// - `400` when either field is missing, empty, or not a string, and when the
///   body is not JSON at all
/// - `404 {success:false, message:"ESP not connected"}` (realtime only)
/// - `502` when the socket or broker rejects the command
///
/// The body is parsed by hand so every rejection carries the JSON error body,
/// whatever the content type.
pub async fn send_command(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let req: SendCommandRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            warn!("Rejected /send-command body: {e}");
            return dispatch_error_response(&DispatchError::InvalidRequest);
        }
    };
    let esp_id = req.esp_id.unwrap_or_default();
    let command = req.command.unwrap_or_default();

    match state.gateway.dispatch(&esp_id, &command).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("Command sent to {esp_id}"),
            })),
        ),
        Err(e) => dispatch_error_response(&e),
    }
}

/// Map a [`DispatchError`] to the status and body the mobile backend expects.
pub fn dispatch_error_response(err: &DispatchError) -> (StatusCode, Json<Value>) {
    let status = match err {
        DispatchError::InvalidRequest => StatusCode::BAD_REQUEST,
        DispatchError::NotConnected { .. } => StatusCode::NOT_FOUND,
        DispatchError::Transport(detail) => {
            warn!("Command dispatch failed: {detail}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"success": false, "message": "Failed to send command"})),
            );
        }
    };
    (
        status,
        Json(json!({"success": false, "message": err.to_string()})),
    )
}
