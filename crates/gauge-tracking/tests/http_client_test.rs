//! HTTP tracking client against a mock tracking service.

use gauge_core::{
    MetricsError, PhaseSummary, Precision, RegistryCell, RunConfig, RunOptions, TelemetrySink,
};
use gauge_tracking::{HttpTrackingClient, TelemetryBackend, TrackingClient, TrackingConfig};
use mockito::Matcher;

fn config_for(server: &mockito::Server) -> TrackingConfig {
    TrackingConfig { base_url: server.url(), api_key: Some("test-key".to_string()), timeout_secs: Some(5) }
}

#[test]
fn test_authenticate_sends_bearer_token() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/v1/auth")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_body("{}")
        .create();

    let mut client = HttpTrackingClient::new(&config_for(&server)).unwrap();
    client.authenticate().unwrap();
    mock.assert();
}

#[test]
fn test_rejected_credentials_map_to_authentication_error() {
    let mut server = mockito::Server::new();
    let _mock = server.mock("POST", "/api/v1/auth").with_status(401).with_body("bad key").create();

    let mut client = HttpTrackingClient::new(&config_for(&server)).unwrap();
    match client.authenticate() {
        Err(MetricsError::Authentication(msg)) => assert!(msg.contains("401")),
        other => panic!("expected authentication error, got {other:?}"),
    }
}

#[test]
fn test_backend_publishes_prefixed_summary() {
    let mut server = mockito::Server::new();
    let _auth = server.mock("POST", "/api/v1/auth").with_status(200).with_body("{}").create();
    let runs = server
        .mock("POST", "/api/v1/runs")
        .match_body(Matcher::PartialJsonString(r#"{"project":"scenes","name":"bedrooms"}"#.to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "run-42"}"#)
        .create();
    let history = server
        .mock("POST", "/api/v1/runs/run-42/history")
        .match_body(Matcher::PartialJsonString(
            r#"{"step":0,"values":{"train_iou":0.5,"train_loss":0.25,"train_epoch":3,"batch_count":1}}"#.to_string(),
        ))
        .with_status(200)
        .create();
    let finish = server.mock("POST", "/api/v1/runs/run-42/finish").with_status(200).create();

    let mut backend = TelemetryBackend::new(HttpTrackingClient::new(&config_for(&server)).unwrap());
    let options = RunOptions {
        project: "scenes".to_string(),
        run_name: "bedrooms".to_string(),
        ..Default::default()
    };
    backend.initialize(RunConfig::new(), None, options).unwrap();
    assert_eq!(backend.run().unwrap().name, "bedrooms");

    let shared = RegistryCell::new().instance();
    let mut registry = shared.lock();
    registry.attach_telemetry(backend);
    registry.metric("iou").record(0.5);
    registry.flush_progress(3, 0, 0.25, Precision::default()).unwrap();
    registry.reset().unwrap();
    registry.finish_telemetry().unwrap();

    runs.assert();
    history.assert();
    finish.assert();
}

#[test]
fn test_history_failure_keeps_registry_state() {
    let mut server = mockito::Server::new();
    let _auth = server.mock("POST", "/api/v1/auth").with_status(200).with_body("{}").create();
    let _runs = server.mock("POST", "/api/v1/runs").with_status(200).with_body(r#"{"id": "run-7"}"#).create();
    let _history = server.mock("POST", "/api/v1/runs/run-7/history").with_status(503).create();

    let mut backend = TelemetryBackend::new(HttpTrackingClient::new(&config_for(&server)).unwrap());
    backend.initialize(RunConfig::new(), None, RunOptions::default()).unwrap();

    let shared = RegistryCell::new().instance();
    let mut registry = shared.lock();
    registry.attach_telemetry(backend);
    registry.metric("iou").record(0.9);
    registry.flush_progress(0, 0, 1.0, Precision::default()).unwrap();

    assert!(matches!(registry.reset(), Err(MetricsError::Publish(_))));
    assert_eq!(registry.get("iou").map(|acc| acc.count()), Some(1));
    assert_eq!(registry.summary(), PhaseSummary { metrics: vec![("iou".to_string(), 0.9)], loss: Some(1.0) });
}

#[test]
fn test_unreachable_service_fails_run_creation() {
    let config = TrackingConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        api_key: Some("test-key".to_string()),
        timeout_secs: Some(2),
    };
    let mut client = HttpTrackingClient::new(&config).unwrap();
    let request = gauge_tracking::RunRequest {
        project: "p".to_string(),
        name: "n".to_string(),
        config: RunConfig::new(),
        tags: Vec::new(),
        started_at: chrono::Utc::now(),
    };
    assert!(matches!(client.open_run(&request), Err(MetricsError::RunCreation(_))));
}
