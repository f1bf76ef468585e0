#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # esp-relay
//!
//! Relays commands from a mobile app's backend to ESP32 boards and carries
//! their sensor readings back.
//!
//! ## Subcommands
//!
//! - `esp-relay gateway` — Socket.IO device registry plus `POST /send-command`
//! - `esp-relay bridge` — MQTT command publishing plus `POST /sensor-data`
//! - `esp-relay final` — `POST /testing-esp` and `POST /receive-sensor-data`
//!
//! ## Flow
//!
//! ```text
//! app ──/testing-esp──▶ final ──/send-command──▶ gateway ──42["command",..]──▶ ESP32
//!                                                bridge  ──<prefix><id>/command──▶ ESP32
//! ESP32 ──/sensor-data or <prefix><id>/data──▶ bridge ──/receive-sensor-data──▶ final
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};

use esp_relay::config::Config;
use esp_relay::gateway::{CommandGateway, MqttCommands};
use esp_relay::mqtt::{self, MqttPublisher};
use esp_relay::routes::{self, final_server::FinalServerState};
use esp_relay::telemetry::{Forwarder, TelemetryIngress};
use esp_relay::{AppState, DeviceRegistry, TopicRouter};

/// ESP32 command relay and telemetry bridge.
#[derive(Parser)]
#[command(name = "esp-relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Socket.IO device gateway.
    Gateway {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Run the MQTT bridge.
    Bridge {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Run the final server the mobile app talks to.
    Final {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Gateway { config } => run_gateway(load_config(config.as_deref())).await,
        Commands::Bridge { config } => run_bridge(load_config(config.as_deref())).await,
        Commands::Final { config } => run_final(load_config(config.as_deref())).await,
    };
    std::process::exit(code);
}

/// Load config and initialize tracing. Exits on a config error.
fn load_config(path: Option<&str>) -> Config {
    let config = match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("esp-relay: {e}");
            std::process::exit(1);
        }
    };

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();
    config
}

async fn run_gateway(config: Config) -> i32 {
    info!("esp-relay gateway v{} starting", env!("CARGO_PKG_VERSION"));
    let listen = config.gateway.listen.clone();

    let state = AppState::new(
        config,
        CommandGateway::Realtime(DeviceRegistry::new()),
        None,
    );
    serve(&listen, routes::gateway_router(state)).await
}

async fn run_bridge(config: Config) -> i32 {
    info!("esp-relay bridge v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "MQTT broker {}:{}, topic prefix {:?}",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic_prefix
    );
    info!("Forwarding sensor data to {}", config.forward.url);

    let forwarder = match Forwarder::new(&config.forward) {
        Ok(f) => f,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return 1;
        }
    };
    let ingress = TelemetryIngress::new(forwarder);
    let topics = TopicRouter::new(&config.mqtt.topic_prefix);

    let (client, eventloop) = mqtt::connect(&config.mqtt);
    let connected = Arc::new(AtomicBool::new(false));
    let event_task = tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        topics.clone(),
        ingress.clone(),
        connected.clone(),
        Duration::from_secs(config.mqtt.reconnect_delay_secs),
    ));

    let publisher = MqttPublisher::new(client.clone(), connected);
    let gateway = CommandGateway::Mqtt(MqttCommands::new(topics, Arc::new(publisher)));
    let listen = config.bridge.listen.clone();
    let state = AppState::new(config, gateway, Some(ingress));

    let code = serve(&listen, routes::bridge_router(state)).await;

    if let Err(e) = client.disconnect().await {
        info!("MQTT disconnect skipped: {e}");
    }
    event_task.abort();
    code
}

async fn run_final(config: Config) -> i32 {
    info!("esp-relay final server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Relaying commands to {}", config.final_server.gateway_url);

    let state = match FinalServerState::new(&config.final_server) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return 1;
        }
    };
    serve(
        &config.final_server.listen,
        routes::final_server::router(state),
    )
    .await
}

/// Bind, serve until SIGINT/SIGTERM, and report an exit code.
async fn serve(listen: &str, app: Router) -> i32 {
    let listener = match TcpListener::bind(listen).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {listen}: {e}");
            return 1;
        }
    };
    info!("Listening on {listen}");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down...");
    match result {
        Ok(()) => {
            info!("Goodbye");
            0
        }
        Err(e) => {
            error!("Server error: {e}");
            1
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
