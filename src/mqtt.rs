//! MQTT side of the bridge: broker session, command publishing, and the
//! inbound event loop that feeds device telemetry into the ingress.
//!
//! The event loop re-issues both wildcard subscriptions on every `ConnAck`,
//! since the broker may have dropped the session while we were away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::DispatchError;
use crate::gateway::CommandPublisher;
use crate::telemetry::{SensorReading, TelemetryIngress};
use crate::topics::{TopicKind, TopicRouter, QOS};

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    options
}

/// Create the client pair. Nothing touches the network until the event loop
/// is polled.
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(config), config.request_capacity)
}

/// [`CommandPublisher`] backed by `rumqttc`.
///
/// `connected` is maintained by [`run_event_loop`]; publishing while it is
/// false fails fast instead of queueing behind a dead session.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, connected: Arc<AtomicBool>) -> Self {
        Self { client, connected }
    }
}

impl CommandPublisher for MqttPublisher {
    fn publish(&self, topic: String, payload: Vec<u8>) -> BoxFuture<'_, Result<(), DispatchError>> {
        async move {
            if !self.connected.load(Ordering::Relaxed) {
                return Err(DispatchError::Transport(
                    "MQTT broker not connected".to_string(),
                ));
            }
            self.client
                .publish(topic, QOS, false, payload)
                .await
                .map_err(|e| DispatchError::Transport(e.to_string()))
        }
        .boxed()
    }

    fn is_connected(&self) -> Option<bool> {
        Some(self.connected.load(Ordering::Relaxed))
    }
}

fn subscribe_all(client: &AsyncClient, topics: &TopicRouter) {
    for kind in [TopicKind::Data, TopicKind::Command] {
        let filter = topics.wildcard(kind);
        // try_subscribe: this runs inside the event loop, so awaiting a full
        // request queue would deadlock.
        match client.try_subscribe(filter.as_str(), QOS) {
            Ok(()) => info!(topic = %filter, "Subscribed"),
            Err(e) => error!(topic = %filter, "Subscribe failed: {e}"),
        }
    }
}

/// Route one inbound publish. Returns the accepted reading, if any.
///
/// Data payloads without an `espId` take the device id from the topic.
pub fn handle_publish(
    topics: &TopicRouter,
    ingress: &TelemetryIngress,
    topic: &str,
    payload: &[u8],
) -> Option<SensorReading> {
    let Some((esp_id, kind)) = topics.parse(topic) else {
        debug!(%topic, "Ignoring publish outside the device topic space");
        return None;
    };

    match kind {
        TopicKind::Command => {
            debug!(
                esp_id,
                command = %String::from_utf8_lossy(payload),
                "Observed command publish"
            );
            None
        }
        TopicKind::Data => {
            let mut value: Value = match serde_json::from_slice(payload) {
                Ok(v) => v,
                Err(e) => {
                    warn!(esp_id, "Dropping non-JSON sensor payload: {e}");
                    return None;
                }
            };
            if let Some(obj) = value.as_object_mut() {
                obj.entry("espId")
                    .or_insert_with(|| Value::String(esp_id.to_string()));
            }
            match ingress.ingest(&value) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    warn!(esp_id, "Dropping sensor payload: {e}");
                    None
                }
            }
        }
    }
}

/// Drive the MQTT session forever. Errors are logged and followed by a pause
/// of `reconnect_delay`; the next poll reconnects.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: TopicRouter,
    ingress: TelemetryIngress,
    connected: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                connected.store(true, Ordering::Relaxed);
                subscribe_all(&client, &topics);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(&topics, &ingress, &publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker sent disconnect");
                connected.store(false, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("MQTT connection lost: {e}");
                } else {
                    debug!("MQTT connect attempt failed: {e}");
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardConfig;
    use crate::telemetry::Forwarder;

    fn ingress() -> TelemetryIngress {
        // Nothing listens on port 9; forwards fail and are only logged.
        let forwarder = Forwarder::new(&ForwardConfig {
            url: "http://127.0.0.1:9/receive-sensor-data".to_string(),
            timeout_secs: 1,
        })
        .unwrap();
        TelemetryIngress::new(forwarder)
    }

    #[tokio::test]
    async fn data_publish_fills_esp_id_from_topic() {
        let topics = TopicRouter::default();
        let payload = br#"{"DHT22_Temp":21.0,"DHT22_Humidity":40.5,"DS18B20_Temp":19.75}"#;
        let reading =
            handle_publish(&topics, &ingress(), "myESPProject/ESP_07/data", payload).unwrap();
        assert_eq!(reading.esp_id, "ESP_07");
        assert!((reading.dht22_humidity - 40.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn invalid_or_foreign_publishes_are_dropped() {
        let topics = TopicRouter::default();
        let ingress = ingress();
        assert!(handle_publish(&topics, &ingress, "myESPProject/ESP_07/data", b"not json").is_none());
        assert!(handle_publish(
            &topics,
            &ingress,
            "myESPProject/ESP_07/data",
            br#"{"DHT22_Temp":21.0}"#
        )
        .is_none());
        assert!(handle_publish(&topics, &ingress, "myESPProject/ESP_07/command", b"on").is_none());
        assert!(handle_publish(&topics, &ingress, "elsewhere/ESP_07/data", b"{}").is_none());
    }

    #[tokio::test]
    async fn publish_fails_fast_while_disconnected() {
        let (client, _eventloop) = connect(&MqttConfig::default());
        let publisher = MqttPublisher::new(client, Arc::new(AtomicBool::new(false)));
        assert_eq!(publisher.is_connected(), Some(false));
        let err = publisher
            .publish("myESPProject/ESP_01/command".to_string(), b"on".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
    }

    #[tokio::test]
    async fn publish_is_queued_while_connected() {
        let (client, _eventloop) = connect(&MqttConfig::default());
        let publisher = MqttPublisher::new(client, Arc::new(AtomicBool::new(true)));
        publisher
            .publish("myESPProject/ESP_01/command".to_string(), b"on".to_vec())
            .await
            .unwrap();
    }

    #[test]
    fn options_follow_config() {
        let config = MqttConfig {
            client_id: "bridge-test".to_string(),
            keep_alive_secs: 15,
            ..MqttConfig::default()
        };
        let options = mqtt_options(&config);
        assert_eq!(options.client_id(), "bridge-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(options.broker_address(), ("broker.hivemq.com".to_string(), 1883));
    }
}
