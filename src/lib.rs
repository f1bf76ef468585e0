#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! esp-relay library: the building blocks of the three relay processes.
//!
//! - `registry` — Socket.IO device registry and connection handles
//! - `realtime` — Engine.IO/Socket.IO codec and WebSocket binding
//! - `topics` — MQTT topic layout
//! - `gateway` — command dispatch over either transport
//! - `mqtt` — broker session, publisher, inbound event loop
//! - `telemetry` — sensor ingress and best-effort forwarding
//! - `routes` — HTTP handlers and per-process routers
//! - `config` — configuration loading

pub mod config;
pub mod error;
pub mod gateway;
pub mod mqtt;
pub mod realtime;
pub mod registry;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod topics;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::{DispatchError, ForwardError, IngestError};
pub use gateway::{CommandGateway, Dispatched};
pub use registry::DeviceRegistry;
pub use state::AppState;
pub use telemetry::{SensorReading, TelemetryIngress};
pub use topics::TopicRouter;
