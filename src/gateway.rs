//! Command gateway: turns `{esp_id, command}` into exactly one emit or
//! publish on the configured transport.
//!
//! - **Realtime**: looks the device up in the [`DeviceRegistry`] and emits a
//!   `command` event to its connection. Unknown ids fail with
//!   [`DispatchError::NotConnected`].
//! - **MQTT**: publishes the raw command to `<prefix><esp_id>/command` at
//!   QoS 1. The broker decouples publisher from subscriber, so there is no
//!   "not connected" outcome, only transport failures.
//!
//! Success means the command was handed to the transport, never that the
//! device executed it. Nothing is retried or deduplicated.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crate::error::DispatchError;
use crate::registry::{ConnectionId, DeviceRegistry};
use crate::topics::{TopicKind, TopicRouter};

/// How a command left the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Emitted { connection: ConnectionId },
    Published { topic: String },
}

/// Publish seam between the gateway and an MQTT client.
pub trait CommandPublisher: Send + Sync {
    /// Hand `payload` to the client for `topic` at QoS 1, retain off.
    fn publish(&self, topic: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), DispatchError>>;

    /// Whether the broker session is currently up, if the publisher knows.
    fn is_connected(&self) -> Option<bool> {
        None
    }
}

/// MQTT half of the gateway: topic layout plus a publisher.
#[derive(Clone)]
pub struct MqttCommands {
    topics: TopicRouter,
    publisher: Arc<dyn CommandPublisher>,
}

impl MqttCommands {
    pub fn new(topics: TopicRouter, publisher: Arc<dyn CommandPublisher>) -> Self {
        Self { topics, publisher }
    }

    pub fn is_connected(&self) -> Option<bool> {
        self.publisher.is_connected()
    }

    async fn dispatch(&self, esp_id: &str, command: &str) -> Result<Dispatched, DispatchError> {
        let topic = self.topics.topic(esp_id, TopicKind::Command);
        self.publisher
            .publish(topic.clone(), command.as_bytes().to_vec())
            .await?;
        info!(esp_id, %topic, command, "Command published");
        Ok(Dispatched::Published { topic })
    }
}

/// The transport a gateway process dispatches through.
#[derive(Clone)]
pub enum CommandGateway {
    Realtime(DeviceRegistry),
    Mqtt(MqttCommands),
}

impl CommandGateway {
    pub async fn dispatch(&self, esp_id: &str, command: &str) -> Result<Dispatched, DispatchError> {
        if esp_id.is_empty() || command.is_empty() {
            return Err(DispatchError::InvalidRequest);
        }
        match self {
            Self::Realtime(registry) => registry.dispatch(esp_id, command).await,
            Self::Mqtt(mqtt) => mqtt.dispatch(esp_id, command).await,
        }
    }

    /// Name reported by `/api/health`.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::Realtime(_) => "socketio",
            Self::Mqtt(_) => "mqtt",
        }
    }

    pub fn registry(&self) -> Option<&DeviceRegistry> {
        match self {
            Self::Realtime(registry) => Some(registry),
            Self::Mqtt(_) => None,
        }
    }

    pub fn mqtt(&self) -> Option<&MqttCommands> {
        match self {
            Self::Realtime(_) => None,
            Self::Mqtt(mqtt) => Some(mqtt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use futures::FutureExt;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl CommandPublisher for RecordingPublisher {
        fn publish(&self, topic: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), DispatchError>> {
            async move {
                if self.fail {
                    return Err(DispatchError::Transport("broker connection lost".into()));
                }
                self.published.lock().unwrap().push((topic, payload));
                Ok(())
            }
            .boxed()
        }
    }

    fn mqtt_gateway(publisher: Arc<RecordingPublisher>) -> CommandGateway {
        CommandGateway::Mqtt(MqttCommands::new(
            TopicRouter::new("myESPProject/"),
            publisher,
        ))
    }

    #[tokio::test]
    async fn empty_fields_are_client_errors() {
        let gateway = CommandGateway::Realtime(DeviceRegistry::new());
        assert!(matches!(
            gateway.dispatch("", "on").await,
            Err(DispatchError::InvalidRequest)
        ));
        assert!(matches!(
            gateway.dispatch("ESP_01", "").await,
            Err(DispatchError::InvalidRequest)
        ));
    }

    #[tokio::test]
    async fn realtime_path_uses_registry() {
        let registry = DeviceRegistry::new();
        let gateway = CommandGateway::Realtime(registry.clone());
        assert!(matches!(
            gateway.dispatch("ESP_01", "on").await,
            Err(DispatchError::NotConnected { .. })
        ));

        let (conn, mut rx) = ConnectionHandle::channel(4);
        registry.register(&conn, "ESP_01").await;
        gateway.dispatch("ESP_01", "on").await.unwrap();
        assert_eq!(rx.try_recv().unwrap().encode(), r#"42["command","on"]"#);
    }

    #[tokio::test]
    async fn mqtt_path_publishes_once_to_command_topic() {
        let publisher = Arc::new(RecordingPublisher::default());
        let gateway = mqtt_gateway(publisher.clone());

        let dispatched = gateway.dispatch("ESP_01", "off").await.unwrap();
        assert_eq!(
            dispatched,
            Dispatched::Published {
                topic: "myESPProject/ESP_01/command".to_string()
            }
        );
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "myESPProject/ESP_01/command");
        assert_eq!(published[0].1, b"off");
    }

    #[tokio::test]
    async fn mqtt_path_never_reports_not_connected() {
        let publisher = Arc::new(RecordingPublisher::default());
        let gateway = mqtt_gateway(publisher);
        assert!(gateway.dispatch("never-seen-device", "on").await.is_ok());
    }

    #[tokio::test]
    async fn mqtt_broker_failure_is_transport_error() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let gateway = mqtt_gateway(publisher);
        assert!(matches!(
            gateway.dispatch("ESP_01", "on").await,
            Err(DispatchError::Transport(_))
        ));
    }
}
