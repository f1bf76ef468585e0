//! Socket.IO endpoint for devices (`GET /socket.io/?EIO=4&transport=websocket`).
//!
//! ## Connection lifecycle
//!
//! 1. Upgrade is refused unless `EIO=4` and `transport=websocket`; the error
//!    bodies match what Engine.IO servers send so client libraries log
//!    something useful.
//! 2. The server sends the open packet, the device answers with a Socket.IO
//!    `CONNECT` to `/`, and the server confirms with `40{"sid":...}`.
//! 3. Events (`42[...]`) go to [`ConnectionEvents::on_message`]. Events with
//!    an ack id are acknowledged with an empty argument list.
//! 4. The server pings every `ping_interval`; a device silent for longer than
//!    `ping_interval + ping_timeout` is dropped.
//! 5. Whatever ends the loop, [`ConnectionEvents::on_disconnect`] runs once.
//!
//! Outgoing packets go through the connection's mpsc channel so that the
//! registry can emit without holding the socket.

use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RealtimeConfig;
use crate::realtime::packet::{EnginePacket, SocketPacket, SocketPacketType, DEFAULT_NAMESPACE};
use crate::registry::{ConnectionEvents, ConnectionHandle};
use crate::AppState;

/// Engine.IO handshake query parameters.
#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "EIO")]
    pub eio: Option<String>,
    pub transport: Option<String>,
}

/// `GET /socket.io/` — WebSocket upgrade for devices.
pub async fn socket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if query.transport.as_deref() != Some("websocket") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 0, "message": "Transport unknown"})),
        )
            .into_response();
    }
    if query.eio.as_deref() != Some("4") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 5, "message": "Unsupported protocol version"})),
        )
            .into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let Some(registry) = state.gateway.registry().cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"code": 0, "message": "Realtime transport disabled"})),
        )
            .into_response();
    };

    let settings = state.config.realtime.clone();
    let (conn, outbound) = ConnectionHandle::channel(settings.outbound_buffer);
    info!(connection = %conn.id(), "Client connected");

    ws.max_message_size(settings.max_payload)
        .on_upgrade(move |socket| {
            let span = info_span!("realtime", connection = %conn.id());
            serve_connection(socket, registry, conn, outbound, settings).instrument(span)
        })
}

enum Flow {
    Continue,
    Close(&'static str),
}

/// Run one device connection to completion.
pub async fn serve_connection<H: ConnectionEvents>(
    socket: WebSocket,
    events: H,
    conn: ConnectionHandle,
    mut outbound: mpsc::Receiver<EnginePacket>,
    settings: RealtimeConfig,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let ping_interval = Duration::from_millis(settings.ping_interval_ms);
    let ping_timeout = Duration::from_millis(settings.ping_timeout_ms);

    let open = EnginePacket::open(
        &conn.id().to_string(),
        settings.ping_interval_ms,
        settings.ping_timeout_ms,
        settings.max_payload,
    );
    if ws_sink
        .send(Message::Text(open.encode().into()))
        .await
        .is_err()
    {
        debug!("Client gone before handshake");
        events.on_disconnect(conn.id()).await;
        return;
    }

    let send_task = tokio::spawn(async move {
        while let Some(packet) = outbound.recv().await {
            if ws_sink
                .send(Message::Text(packet.encode().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    let mut last_pong = Instant::now();
    let mut joined = false;

    let reason = loop {
        tokio::select! {
            msg = ws_stream.next() => {
                let Some(Ok(msg)) = msg else { break "transport closed" };
                match msg {
                    Message::Text(text) => {
                        let flow = handle_frame(&events, &conn, &mut joined, &mut last_pong, text.as_str()).await;
                        if let Flow::Close(reason) = flow {
                            break reason;
                        }
                    }
                    Message::Binary(_) => warn!("Ignoring binary frame"),
                    Message::Close(_) => break "client closed",
                    _ => {}
                }
            }
            _ = ping.tick() => {
                // Lenient check: a missed pong is noticed on the following tick.
                if last_pong.elapsed() > ping_interval + ping_timeout {
                    break "ping timeout";
                }
                if let Flow::Close(reason) = queue_control(&conn, EnginePacket::Ping(String::new())) {
                    break reason;
                }
            }
        }
    };

    info!(reason, "Client disconnected");
    events.on_disconnect(conn.id()).await;
    send_task.abort();
}

async fn handle_frame<H: ConnectionEvents>(
    events: &H,
    conn: &ConnectionHandle,
    joined: &mut bool,
    last_pong: &mut Instant,
    frame: &str,
) -> Flow {
    let packet = match EnginePacket::decode(frame) {
        Ok(p) => p,
        Err(e) => {
            warn!("Dropping malformed frame: {e}");
            return Flow::Continue;
        }
    };
    match packet {
        EnginePacket::Pong(_) => {
            *last_pong = Instant::now();
            Flow::Continue
        }
        EnginePacket::Ping(data) => queue_control(conn, EnginePacket::Pong(data)),
        EnginePacket::Message(data) => handle_socket_packet(events, conn, joined, &data).await,
        EnginePacket::Close => Flow::Close("client sent close"),
        EnginePacket::Open(_) | EnginePacket::Upgrade | EnginePacket::Noop => Flow::Continue,
    }
}

async fn handle_socket_packet<H: ConnectionEvents>(
    events: &H,
    conn: &ConnectionHandle,
    joined: &mut bool,
    data: &str,
) -> Flow {
    let packet = match SocketPacket::decode(data) {
        Ok(p) => p,
        Err(e) => {
            warn!("Dropping malformed packet: {e}");
            return Flow::Continue;
        }
    };

    match packet.kind {
        SocketPacketType::Connect => {
            if packet.namespace == DEFAULT_NAMESPACE {
                *joined = true;
                debug!("Namespace connected");
                queue_control(conn, SocketPacket::connect(&conn.id().to_string()).into())
            } else {
                warn!(namespace = %packet.namespace, "Rejecting unknown namespace");
                queue_control(
                    conn,
                    SocketPacket::connect_error(&packet.namespace, "Invalid namespace").into(),
                )
            }
        }
        SocketPacketType::Disconnect if packet.namespace == DEFAULT_NAMESPACE => {
            Flow::Close("client disconnected namespace")
        }
        SocketPacketType::Event => {
            if !*joined {
                warn!("Ignoring event sent before namespace connect");
                return Flow::Continue;
            }
            if packet.namespace != DEFAULT_NAMESPACE {
                warn!(namespace = %packet.namespace, "Ignoring event on unjoined namespace");
                return Flow::Continue;
            }
            if let Some((name, args)) = packet.event_parts() {
                let payload = args.first().cloned().unwrap_or(Value::Null);
                events.on_message(conn, name, &payload).await;
            }
            match packet.id {
                Some(id) => queue_control(
                    conn,
                    SocketPacket::ack(&packet.namespace, id, Vec::new()).into(),
                ),
                None => Flow::Continue,
            }
        }
        SocketPacketType::Disconnect | SocketPacketType::Ack | SocketPacketType::ConnectError => {
            Flow::Continue
        }
    }
}

/// Queue a control packet without blocking the reader loop. A full queue
/// means the device stopped reading; the connection is closed rather than
/// left stuck where the ping timeout can no longer fire.
fn queue_control(conn: &ConnectionHandle, packet: EnginePacket) -> Flow {
    match conn.try_send(packet) {
        Ok(()) => Flow::Continue,
        Err(e) => {
            warn!("{e}");
            Flow::Close("outbound queue unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;

    async fn feed(
        registry: &DeviceRegistry,
        conn: &ConnectionHandle,
        joined: &mut bool,
        frame: &str,
    ) -> Flow {
        let mut last_pong = Instant::now();
        handle_frame(registry, conn, joined, &mut last_pong, frame).await
    }

    #[tokio::test]
    async fn events_on_unjoined_namespace_are_ignored() {
        let registry = DeviceRegistry::new();
        let (conn, mut rx) = ConnectionHandle::channel(8);
        let mut joined = false;

        feed(&registry, &conn, &mut joined, "40").await;
        assert!(rx.try_recv().unwrap().encode().starts_with("40{"));

        feed(&registry, &conn, &mut joined, r#"42/admin,["register","SPOOF"]"#).await;
        assert!(registry.lookup("SPOOF").await.is_none());

        feed(&registry, &conn, &mut joined, r#"42["register","ESP_01"]"#).await;
        assert!(registry.lookup("ESP_01").await.is_some());
    }

    #[tokio::test]
    async fn events_before_connect_are_ignored() {
        let registry = DeviceRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(8);
        let mut joined = false;

        feed(&registry, &conn, &mut joined, r#"42["register","ESP_01"]"#).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_namespace_connect_gets_error() {
        let registry = DeviceRegistry::new();
        let (conn, mut rx) = ConnectionHandle::channel(8);
        let mut joined = false;

        feed(&registry, &conn, &mut joined, "40/admin,").await;
        assert!(!joined);
        assert_eq!(
            rx.try_recv().unwrap().encode(),
            r#"44/admin,{"message":"Invalid namespace"}"#
        );
    }

    #[tokio::test]
    async fn event_ack_is_sent_with_id() {
        let registry = DeviceRegistry::new();
        let (conn, mut rx) = ConnectionHandle::channel(8);
        let mut joined = false;

        feed(&registry, &conn, &mut joined, "40").await;
        rx.try_recv().unwrap();
        feed(&registry, &conn, &mut joined, r#"427["register","ESP_01"]"#).await;
        assert_eq!(rx.try_recv().unwrap().encode(), "437[]");
    }

    #[tokio::test]
    async fn full_outbound_queue_closes_connection() {
        let registry = DeviceRegistry::new();
        let (conn, _rx) = ConnectionHandle::channel(1);
        let mut joined = false;
        conn.try_send(EnginePacket::Noop).unwrap();

        assert!(matches!(
            feed(&registry, &conn, &mut joined, "2").await,
            Flow::Close(_)
        ));
        assert!(matches!(
            feed(&registry, &conn, &mut joined, "40").await,
            Flow::Close(_)
        ));
    }
}
