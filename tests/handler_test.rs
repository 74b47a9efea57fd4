use axum::Router;
use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use rask_log_queue::app::router::producer_router;
use rask_log_queue::app::state::AppState;
use rask_log_queue::config::Settings;
use rask_log_queue::test_support::{InMemoryBroker, StaticProbe};
use serde_json::{Value, json};
use std::sync::Arc;

fn default_settings() -> Settings {
    Settings::from_source(|_| None).unwrap()
}

fn create_test_app(broker: &InMemoryBroker, probe: StaticProbe) -> Router {
    let state = AppState::with_components(
        broker.client(),
        broker.client(),
        Arc::new(probe),
        &default_settings(),
    );
    producer_router(state.publisher, state.health)
}

fn create_test_server(broker: &InMemoryBroker) -> TestServer {
    TestServer::new(create_test_app(broker, StaticProbe::with_pressure(40.0, 40.0))).unwrap()
}

#[tokio::test]
async fn test_log_endpoint_queues_record_and_injects_timestamp() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    let response = server
        .post("/log")
        .json(&json!({"level": "WARN", "message": "slow request", "route": "/api"}))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    assert_eq!(body["message"], "Log message queued");
    let timestamp = body["timestamp"].as_str().unwrap().to_string();
    assert!(timestamp.ends_with("+00:00"), "unexpected timestamp {timestamp}");

    let queued = broker.ready_messages("logs");
    assert_eq!(queued.len(), 1);
    let record: Value = serde_json::from_slice(&queued[0]).unwrap();
    assert_eq!(record["timestamp"], Value::String(timestamp));
    assert_eq!(record["route"], "/api");
    assert_eq!(broker.queue_durability("logs"), Some(true));
}

#[tokio::test]
async fn test_log_endpoint_keeps_supplied_timestamp() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    let response = server
        .post("/log")
        .json(&json!({"timestamp": "2025-01-10T12:00:00Z", "message": "hi"}))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["timestamp"], "2025-01-10T12:00:00Z");
}

#[tokio::test]
async fn test_log_endpoint_rejects_non_json_content_type() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    let response = server.post("/log").text(r#"{"message":"hi"}"#).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert!(broker.ready_messages("logs").is_empty());
    assert_eq!(broker.connect_attempts(), 0);
}

#[tokio::test]
async fn test_log_endpoint_rejects_malformed_json() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    let response = server
        .post("/log")
        .bytes(Bytes::from_static(b"{\"message\": "))
        .content_type("application/json")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(broker.ready_messages("logs").is_empty());
}

#[tokio::test]
async fn test_log_endpoint_rejects_non_object_json() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    let response = server.post("/log").json(&json!(["not", "a", "record"])).await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_log_endpoint_reports_broker_failure() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    let server = create_test_server(&broker);

    let response = server.post("/log").json(&json!({"message": "lost"})).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["status"], "error");
    assert_eq!(broker.connect_attempts(), 1);
}

#[tokio::test]
async fn test_log_endpoint_closes_connection_per_request() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    for i in 0..3 {
        server
            .post("/log")
            .json(&json!({"message": format!("m{i}")}))
            .await
            .assert_status(StatusCode::CREATED);
    }

    assert_eq!(broker.connect_attempts(), 3);
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.ready_messages("logs").len(), 3);
}

#[tokio::test]
async fn test_health_endpoint_degraded_when_broker_unreachable() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    let server = create_test_server(&broker);

    let response = server.get("/health").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["service"], "log-producer");
    assert_eq!(body["rabbitmq"]["status"], "disconnected");
    assert_eq!(body["rabbitmq"]["host"], "localhost:5672");
}

#[tokio::test]
async fn test_health_endpoint_healthy_when_broker_reachable() {
    let broker = InMemoryBroker::new();
    let server = create_test_server(&broker);

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rabbitmq"]["status"], "connected");
    assert_eq!(broker.open_sessions(), 0);
    assert_eq!(broker.queue_durability("logs"), None);
}

#[tokio::test]
async fn test_health_endpoint_warns_on_resource_pressure() {
    let broker = InMemoryBroker::new();
    let server =
        TestServer::new(create_test_app(&broker, StaticProbe::with_pressure(95.0, 10.0))).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "warning");
}
