//! Telemetry ingress and best-effort forwarding to the final server.
//!
//! A reading counts as received the moment [`TelemetryIngress::ingest`]
//! accepts it. Forwarding runs on its own task afterwards; its failures are
//! logged and never reach whoever sent the reading.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ForwardConfig;
use crate::error::{ForwardError, IngestError};

/// One sample from the DHT22 and DS18B20 sensors, stamped at ingress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "espId")]
    pub esp_id: String,
    #[serde(rename = "DHT22_Temp")]
    pub dht22_temp: f64,
    #[serde(rename = "DHT22_Humidity")]
    pub dht22_humidity: f64,
    #[serde(rename = "DS18B20_Temp")]
    pub ds18b20_temp: f64,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Validate a raw payload and stamp it with `received_at`.
    ///
    /// `espId` must be a non-empty string and each reading a JSON number.
    /// Any `timestamp` sent by the device is ignored.
    pub fn from_payload(payload: &Value, received_at: DateTime<Utc>) -> Result<Self, IngestError> {
        let esp_id = payload
            .get("espId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(IngestError::InvalidPayload { field: "espId" })?;
        Ok(Self {
            esp_id: esp_id.to_string(),
            dht22_temp: number_field(payload, "DHT22_Temp")?,
            dht22_humidity: number_field(payload, "DHT22_Humidity")?,
            ds18b20_temp: number_field(payload, "DS18B20_Temp")?,
            timestamp: received_at,
        })
    }
}

fn number_field(payload: &Value, field: &'static str) -> Result<f64, IngestError> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .ok_or(IngestError::InvalidPayload { field })
}

/// HTTP client for the final server's `/receive-sensor-data`.
#[derive(Clone)]
pub struct Forwarder {
    http: reqwest::Client,
    url: String,
}

impl Forwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }

    /// POST one reading and wait for a 2xx.
    pub async fn forward(&self, reading: &SensorReading) -> Result<(), ForwardError> {
        let resp = self.http.post(&self.url).json(reading).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ForwardError::Status(status.as_u16()))
        }
    }

    /// Spawn [`Self::forward`] and return immediately. Failures are logged.
    pub fn forward_best_effort(&self, reading: SensorReading) {
        let forwarder = self.clone();
        tokio::spawn(async move {
            match forwarder.forward(&reading).await {
                Ok(()) => debug!(esp_id = %reading.esp_id, "Sensor data forwarded"),
                Err(e) => warn!(
                    esp_id = %reading.esp_id,
                    url = %forwarder.url,
                    "Failed to forward sensor data: {e}"
                ),
            }
        });
    }
}

/// Edge validation plus hand-off to the [`Forwarder`].
#[derive(Clone)]
pub struct TelemetryIngress {
    forwarder: Forwarder,
}

impl TelemetryIngress {
    pub fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }

    /// Accept or reject a payload. Rejected payloads are never forwarded.
    pub fn ingest(&self, payload: &Value) -> Result<SensorReading, IngestError> {
        let reading = SensorReading::from_payload(payload, Utc::now())?;
        info!(
            esp_id = %reading.esp_id,
            dht22_temp = reading.dht22_temp,
            dht22_humidity = reading.dht22_humidity,
            ds18b20_temp = reading.ds18b20_temp,
            "Sensor data received"
        );
        self.forwarder.forward_best_effort(reading.clone());
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> Value {
        json!({
            "espId": "ESP_01",
            "DHT22_Temp": 24.5,
            "DHT22_Humidity": 61.0,
            "DS18B20_Temp": 22.25,
        })
    }

    #[test]
    fn accepts_complete_payload() {
        let now = Utc::now();
        let reading = SensorReading::from_payload(&complete(), now).unwrap();
        assert_eq!(reading.esp_id, "ESP_01");
        assert!((reading.dht22_temp - 24.5).abs() < f64::EPSILON);
        assert!((reading.ds18b20_temp - 22.25).abs() < f64::EPSILON);
        assert_eq!(reading.timestamp, now);
    }

    #[test]
    fn zero_is_a_valid_reading() {
        let mut payload = complete();
        payload["DS18B20_Temp"] = json!(0);
        assert!(SensorReading::from_payload(&payload, Utc::now()).is_ok());
    }

    #[test]
    fn each_missing_field_is_reported() {
        for field in ["espId", "DHT22_Temp", "DHT22_Humidity", "DS18B20_Temp"] {
            let mut payload = complete();
            payload.as_object_mut().unwrap().remove(field);
            assert_eq!(
                SensorReading::from_payload(&payload, Utc::now()),
                Err(IngestError::InvalidPayload { field })
            );
        }
    }

    #[test]
    fn rejects_non_numeric_readings_and_empty_id() {
        let mut payload = complete();
        payload["DHT22_Humidity"] = json!("61");
        assert_eq!(
            SensorReading::from_payload(&payload, Utc::now()),
            Err(IngestError::InvalidPayload {
                field: "DHT22_Humidity"
            })
        );

        let mut payload = complete();
        payload["espId"] = json!("");
        assert!(SensorReading::from_payload(&payload, Utc::now()).is_err());
    }

    #[test]
    fn device_timestamp_is_replaced() {
        let mut payload = complete();
        payload["timestamp"] = json!("1999-01-01T00:00:00Z");
        let now = Utc::now();
        let reading = SensorReading::from_payload(&payload, now).unwrap();
        assert_eq!(reading.timestamp, now);
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let reading = SensorReading::from_payload(&complete(), Utc::now()).unwrap();
        let wire = serde_json::to_value(&reading).unwrap();
        assert_eq!(wire["espId"], "ESP_01");
        assert_eq!(wire["DHT22_Temp"], 24.5);
        assert_eq!(wire["DHT22_Humidity"], 61.0);
        assert!(wire["timestamp"].is_string());
    }
}
