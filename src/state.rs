//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::gateway::CommandGateway;
use crate::telemetry::TelemetryIngress;

/// State for the gateway and bridge processes.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Transport commands are dispatched through.
    pub gateway: CommandGateway,
    /// Sensor ingress. `None` in the gateway process, which has no
    /// `/sensor-data` route.
    pub ingress: Option<TelemetryIngress>,
}

impl AppState {
    pub fn new(config: Config, gateway: CommandGateway, ingress: Option<TelemetryIngress>) -> Self {
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            gateway,
            ingress,
        }
    }
}
