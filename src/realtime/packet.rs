//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only the WebSocket transport is spoken, so every frame carries exactly one
//! Engine.IO packet: a single type digit followed by its data.
//!
//! | Engine.IO | Meaning  | Socket.IO (inside `4`) | Meaning       |
//! |-----------|----------|------------------------|---------------|
//! | `0`       | open     | `0`                    | connect       |
//! | `1`       | close    | `1`                    | disconnect    |
//! | `2`       | ping     | `2`                    | event         |
//! | `3`       | pong     | `3`                    | ack           |
//! | `4`       | message  | `4`                    | connect error |
//! | `5`       | upgrade  | `5` / `6`              | binary (unsupported) |
//! | `6`       | noop     |                        |               |
//!
//! A Socket.IO packet is `<type>[<namespace>,][<ack id>][<json>]`, so the
//! frame `42["register","ESP_01"]` is an Engine.IO message holding a
//! Socket.IO event on the default namespace.

use std::fmt::Write as _;

use serde_json::{json, Value};
use thiserror::Error;

/// Namespace every device connects to.
pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type `{0}`")]
    UnknownType(char),
    #[error("binary packets are not supported")]
    BinaryUnsupported,
    #[error("invalid ack id")]
    InvalidAckId,
    #[error("event packet without a name")]
    MissingEventName,
    #[error("invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One Engine.IO packet as carried by a WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    /// Handshake JSON sent by the server right after the upgrade.
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    /// Encoded Socket.IO packet.
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, PacketError> {
        let kind = frame.chars().next().ok_or(PacketError::Empty)?;
        let data = &frame[kind.len_utf8()..];
        match kind {
            '0' => Ok(Self::Open(data.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(data.to_string())),
            '3' => Ok(Self::Pong(data.to_string())),
            '4' => Ok(Self::Message(data.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(data) => format!("0{data}"),
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    /// Build the open packet advertised to a freshly upgraded connection.
    ///
    /// `upgrades` is always empty: the connection already is a WebSocket.
    pub fn open(sid: &str, ping_interval_ms: u64, ping_timeout_ms: u64, max_payload: usize) -> Self {
        Self::Open(
            json!({
                "sid": sid,
                "upgrades": [],
                "pingInterval": ping_interval_ms,
                "pingTimeout": ping_timeout_ms,
                "maxPayload": max_payload,
            })
            .to_string(),
        )
    }
}

impl From<SocketPacket> for EnginePacket {
    fn from(packet: SocketPacket) -> Self {
        Self::Message(packet.encode())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl SocketPacketType {
    fn as_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
        }
    }
}

/// A decoded Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    pub kind: SocketPacketType,
    pub namespace: String,
    pub id: Option<u64>,
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Successful namespace connect, answered to a client `CONNECT`.
    pub fn connect(sid: &str) -> Self {
        Self {
            kind: SocketPacketType::Connect,
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            data: Some(json!({ "sid": sid })),
        }
    }

    pub fn connect_error(namespace: &str, message: &str) -> Self {
        Self {
            kind: SocketPacketType::ConnectError,
            namespace: namespace.to_string(),
            id: None,
            data: Some(json!({ "message": message })),
        }
    }

    /// Event on the default namespace with a single argument.
    pub fn event(name: &str, payload: Value) -> Self {
        Self {
            kind: SocketPacketType::Event,
            namespace: DEFAULT_NAMESPACE.to_string(),
            id: None,
            data: Some(json!([name, payload])),
        }
    }

    pub fn ack(namespace: &str, id: u64, args: Vec<Value>) -> Self {
        Self {
            kind: SocketPacketType::Ack,
            namespace: namespace.to_string(),
            id: Some(id),
            data: Some(Value::Array(args)),
        }
    }

    /// Event name and arguments, or `None` for non-event packets.
    pub fn event_parts(&self) -> Option<(&str, &[Value])> {
        if self.kind != SocketPacketType::Event {
            return None;
        }
        let items = self.data.as_ref()?.as_array()?;
        let (name, args) = items.split_first()?;
        Some((name.as_str()?, args))
    }

    pub fn decode(packet: &str) -> Result<Self, PacketError> {
        let kind_char = packet.chars().next().ok_or(PacketError::Empty)?;
        let kind = match kind_char {
            '0' => SocketPacketType::Connect,
            '1' => SocketPacketType::Disconnect,
            '2' => SocketPacketType::Event,
            '3' => SocketPacketType::Ack,
            '4' => SocketPacketType::ConnectError,
            '5' | '6' => return Err(PacketError::BinaryUnsupported),
            other => return Err(PacketError::UnknownType(other)),
        };
        let mut rest = &packet[kind_char.len_utf8()..];

        let namespace = if rest.starts_with('/') {
            if let Some(comma) = rest.find(',') {
                let ns = &rest[..comma];
                rest = &rest[comma + 1..];
                ns
            } else {
                let ns = rest;
                rest = "";
                ns
            }
        } else {
            DEFAULT_NAMESPACE
        };

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse()
                    .map_err(|_| PacketError::InvalidAckId)?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        let decoded = Self {
            kind,
            namespace: namespace.to_string(),
            id,
            data,
        };
        if kind == SocketPacketType::Event && decoded.event_parts().is_none() {
            return Err(PacketError::MissingEventName);
        }
        Ok(decoded)
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.as_char());
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            let _ = write!(out, "{id}");
        }
        if let Some(ref data) = self.data {
            out.push_str(&data.to_string());
        }
        out
    }
}
