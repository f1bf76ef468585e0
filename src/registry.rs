//! Device registry for the Socket.IO transport.
//!
//! Maps a device id to the live connection that last announced it with a
//! `register` event. The registry is an ordinary owned value: the gateway
//! process builds one at startup and hands clones to the router and to every
//! connection task.
//!
//! ## Lifecycle per device id
//!
//! ```text
//!  Unregistered --register(conn)--> Registered(conn)
//!  Registered(c1) --register(c2)--> Registered(c2)    (silent overwrite)
//!  Registered(c2) --close(c1)-----> Registered(c2)    (stale close ignored)
//!  Registered(c2) --close(c2)-----> Unregistered
//! ```
//!
//! Removal is keyed by connection identity, never by device id, so a late
//! close from a replaced connection cannot evict the newer registration.
//! There is no heartbeat here: a connection that never closes stays
//! registered until the transport's own ping timeout closes it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::gateway::Dispatched;
use crate::realtime::packet::{EnginePacket, SocketPacket};

/// Event a device emits to claim an id.
pub const REGISTER_EVENT: &str = "register";
/// Event the gateway emits to deliver a command.
pub const COMMAND_EVENT: &str = "command";

/// Identity of one realtime connection. Also used as its Engine.IO `sid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sending half of a connection: packets queued here are written to the
/// socket by the connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<EnginePacket>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<EnginePacket>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    /// Handle plus the receiver a writer task (or a test) drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EnginePacket>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a raw Engine.IO packet.
    pub async fn send(&self, packet: EnginePacket) -> Result<(), DispatchError> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| DispatchError::Transport(format!("connection {} closed", self.id)))
    }

    /// Queue a packet without waiting. Fails when the writer has fallen
    /// behind and the queue is full, or when the connection is gone.
    pub fn try_send(&self, packet: EnginePacket) -> Result<(), DispatchError> {
        self.tx.try_send(packet).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                DispatchError::Transport(format!("connection {} outbound queue full", self.id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                DispatchError::Transport(format!("connection {} closed", self.id))
            }
        })
    }

    /// Emit a Socket.IO event with a single argument.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), DispatchError> {
        self.send(SocketPacket::event(event, payload).into()).await
    }
}

/// Callbacks a transport binding drives for each connection.
///
/// Events belonging to one connection are delivered in arrival order.
pub trait ConnectionEvents: Send + Sync {
    fn on_register(
        &self,
        conn: &ConnectionHandle,
        device_id: &str,
    ) -> impl Future<Output = ()> + Send;

    fn on_disconnect(&self, conn_id: ConnectionId) -> impl Future<Output = ()> + Send;

    fn on_message(
        &self,
        conn: &ConnectionHandle,
        event: &str,
        payload: &Value,
    ) -> impl Future<Output = ()> + Send;
}

struct Registration {
    conn: ConnectionHandle,
    registered_at: Instant,
}

/// Registry entry as reported by `GET /api/devices`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredDevice {
    pub esp_id: String,
    pub connection: ConnectionId,
    pub registered_secs_ago: u64,
}

/// Live `device id -> connection` table.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<String, Registration>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `conn` as the route to `device_id`, replacing any previous
    /// entry. Returns the connection that was on record before, if any.
    pub async fn register(&self, conn: &ConnectionHandle, device_id: &str) -> Option<ConnectionId> {
        let previous = self.devices.write().await.insert(
            device_id.to_string(),
            Registration {
                conn: conn.clone(),
                registered_at: Instant::now(),
            },
        );
        let previous = previous.map(|r| r.conn.id());
        match previous {
            Some(old) if old != conn.id() => warn!(
                esp_id = %device_id,
                connection = %conn.id(),
                replaced = %old,
                "ESP re-registered on a new connection, replacing old entry"
            ),
            _ => info!(esp_id = %device_id, connection = %conn.id(), "ESP registered"),
        }
        previous
    }

    /// Drop every entry still bound to `conn_id`. Entries that were already
    /// taken over by another connection are left alone.
    pub async fn unregister_connection(&self, conn_id: ConnectionId) -> Vec<String> {
        let mut devices = self.devices.write().await;
        let removed: Vec<String> = devices
            .iter()
            .filter(|(_, reg)| reg.conn.id() == conn_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            devices.remove(id);
            info!(esp_id = %id, connection = %conn_id, "ESP disconnected");
        }
        removed
    }

    pub async fn lookup(&self, device_id: &str) -> Option<ConnectionHandle> {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|reg| reg.conn.clone())
    }

    /// Emit one `command` event to the connection on record for `device_id`.
    ///
    /// Presence in the table is the only liveness check.
    pub async fn dispatch(&self, device_id: &str, command: &str) -> Result<Dispatched, DispatchError> {
        // Clone the handle so the lock is not held across the send.
        let conn = self
            .lookup(device_id)
            .await
            .ok_or_else(|| DispatchError::NotConnected {
                esp_id: device_id.to_string(),
            })?;
        conn.emit(COMMAND_EVENT, Value::String(command.to_string()))
            .await?;
        info!(esp_id = %device_id, connection = %conn.id(), command, "Command emitted");
        Ok(Dispatched::Emitted {
            connection: conn.id(),
        })
    }

    pub async fn list(&self) -> Vec<RegisteredDevice> {
        let devices = self.devices.read().await;
        let mut list: Vec<RegisteredDevice> = devices
            .iter()
            .map(|(id, reg)| RegisteredDevice {
                esp_id: id.clone(),
                connection: reg.conn.id(),
                registered_secs_ago: reg.registered_at.elapsed().as_secs(),
            })
            .collect();
        list.sort_by(|a, b| a.esp_id.cmp(&b.esp_id));
        list
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }
}

impl ConnectionEvents for DeviceRegistry {
    async fn on_register(&self, conn: &ConnectionHandle, device_id: &str) {
        self.register(conn, device_id).await;
    }

    async fn on_disconnect(&self, conn_id: ConnectionId) {
        let removed = self.unregister_connection(conn_id).await;
        if removed.is_empty() {
            debug!(connection = %conn_id, "Unregistered connection closed");
        }
    }

    async fn on_message(&self, conn: &ConnectionHandle, event: &str, payload: &Value) {
        match event {
            REGISTER_EVENT => match payload.as_str() {
                Some(id) if !id.is_empty() => self.on_register(conn, id).await,
                _ => warn!(
                    connection = %conn.id(),
                    %payload,
                    "Ignoring register event without a device id"
                ),
            },
            other => debug!(connection = %conn.id(), event = other, "Unhandled event"),
        }
    }
}
