//! HTTP route handlers and router assembly.
//!
//! Each process mounts a different set:
//!
//! | Process   | Routes                                                              |
//! |-----------|---------------------------------------------------------------------|
//! | gateway   | `/api/health`, `/api/devices`, `POST /send-command`, `/socket.io/`  |
//! | bridge    | `/api/health`, `POST /send-command`, `POST /sensor-data`            |
//! | final     | `/api/health`, `POST /testing-esp`, `POST /receive-sensor-data`     |
//!
//! There is no authentication on any route; callers are the mobile app's
//! backend and the devices themselves.

pub mod command;
pub mod devices;
pub mod final_server;
pub mod health;
pub mod sensor;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::realtime;
use crate::AppState;

/// Socket.IO gateway: device registry plus `/send-command`.
pub fn gateway_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/devices", get(devices::list_devices))
        .route("/send-command", post(command::send_command))
        .route("/socket.io", get(realtime::socket_upgrade))
        .route("/socket.io/", get(realtime::socket_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// MQTT bridge: publish commands, accept sensor data.
pub fn bridge_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/send-command", post(command::send_command))
        .route("/sensor-data", post(sensor::sensor_data))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
