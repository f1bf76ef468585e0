//! MQTT topic layout.
//!
//! Every device owns two topics under a shared prefix:
//!
//! - `<prefix><esp_id>/command` — the bridge publishes, the device subscribes
//! - `<prefix><esp_id>/data` — the device publishes, the bridge subscribes
//!
//! The router stores nothing and tracks no presence; a publish to a device
//! nobody listens for still succeeds at the broker.

use std::fmt;

use rumqttc::QoS;

/// Delivery guarantee for commands and telemetry. Devices must tolerate
/// duplicate commands.
pub const QOS: QoS = QoS::AtLeastOnce;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Command,
    Data,
}

impl TopicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRouter {
    prefix: String,
}

impl TopicRouter {
    /// `prefix` gets a trailing `/` if it lacks one.
    pub fn new(prefix: &str) -> Self {
        let mut prefix = prefix.to_string();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn topic(&self, esp_id: &str, kind: TopicKind) -> String {
        format!("{}{esp_id}/{kind}", self.prefix)
    }

    /// Single-level wildcard across every device id.
    pub fn wildcard(&self, kind: TopicKind) -> String {
        format!("{}+/{kind}", self.prefix)
    }

    /// Split an inbound topic back into device id and kind.
    ///
    /// Returns `None` for topics outside the prefix, unknown kinds, or an
    /// empty device id.
    pub fn parse<'a>(&self, topic: &'a str) -> Option<(&'a str, TopicKind)> {
        let rest = topic.strip_prefix(self.prefix.as_str())?;
        let (esp_id, kind) = rest.rsplit_once('/')?;
        if esp_id.is_empty() {
            return None;
        }
        let kind = match kind {
            "command" => TopicKind::Command,
            "data" => TopicKind::Data,
            _ => return None,
        };
        Some((esp_id, kind))
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new("myESPProject/")
    }
}
