use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::post,
    Json, Router,
};
use esp_relay::config::FinalServerConfig;
use esp_relay::routes::final_server::{router, FinalServerState};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tower::util::ServiceExt; // for `oneshot`

/// Fake gateway answering `/send-command` with a fixed status, recording bodies.
async fn spawn_gateway(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>, JoinHandle<()>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let app = Router::new().route(
        "/send-command",
        post(move |Json::<Value>(body)| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(body);
                (status, Json(json!({"success": status.is_success()})))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{addr}/"), seen, handle)
}

fn final_app(gateway_url: &str) -> Router {
    let state = FinalServerState::new(&FinalServerConfig {
        listen: "127.0.0.1:0".to_string(),
        gateway_url: gateway_url.to_string(),
        timeout_secs: 2,
    })
    .unwrap();
    router(state)
}

async fn post_json(app: Router, uri: &str, body: impl Into<Body>) -> (StatusCode, Value) {
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(body.into())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn testing_esp_relays_to_gateway() {
    let (url, seen, handle) = spawn_gateway(StatusCode::OK).await;

    let (status, body) = post_json(
        final_app(&url),
        "/testing-esp",
        json!({"command": "on", "esp_id": "ESP_01"}).to_string(),
    )
    .await;
    handle.abort();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "success"}));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[json!({"esp_id": "ESP_01", "command": "on"})]
    );
}

#[tokio::test]
async fn testing_esp_collapses_gateway_rejection_to_error() {
    let (url, _seen, handle) = spawn_gateway(StatusCode::NOT_FOUND).await;

    let (status, body) = post_json(
        final_app(&url),
        "/testing-esp",
        json!({"command": "on", "esp_id": "ESP_99"}).to_string(),
    )
    .await;
    handle.abort();

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"message": "error"}));
}

#[tokio::test]
async fn testing_esp_with_unreachable_gateway_is_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (status, body) = post_json(
        final_app(&format!("http://{addr}")),
        "/testing-esp",
        json!({"command": "on", "esp_id": "ESP_01"}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"message": "error"}));
}

#[tokio::test]
async fn receive_sensor_data_accepts_forwarded_reading() {
    let (status, body) = post_json(
        final_app("http://127.0.0.1:9"),
        "/receive-sensor-data",
        json!({
            "espId": "ESP_01",
            "DHT22_Temp": 23.5,
            "DHT22_Humidity": 55.0,
            "DS18B20_Temp": 21.25,
            "timestamp": "2026-10-15T08:30:00Z",
        })
        .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
}

#[tokio::test]
async fn receive_sensor_data_rejects_incomplete_reading() {
    let (status, body) = post_json(
        final_app("http://127.0.0.1:9"),
        "/receive-sensor-data",
        json!({"espId": "ESP_01", "DHT22_Temp": 23.5}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"success": false, "message": "Missing sensor data"})
    );
}
