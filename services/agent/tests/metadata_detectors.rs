//! Integration tests for the metadata client and detectors.
//!
//! A wiremock server stands in for the instance metadata service.

use std::sync::Arc;
use std::time::Duration;

use spotwatch_agent::detector::{Detector, MaintenanceDetector, SpotDetector};
use spotwatch_agent::{DetectorError, MetadataClient, MetadataError};
use spotwatch_interruption::EventKind;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "AQAEAFake-token==";

async fn mount_token(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path("/latest/api/token"))
        .and(header("X-aws-ec2-metadata-token-ttl-seconds", "21600"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOKEN))
        .mount(server)
        .await;
}

async fn mount_value(server: &MockServer, metadata_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(metadata_path))
        .and(header("X-aws-ec2-metadata-token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

fn metadata(server: &MockServer) -> Arc<MetadataClient> {
    Arc::new(
        MetadataClient::new(&server.uri(), 3)
            .unwrap()
            .with_retry_delay(Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn test_node_identity_with_session_token() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_value(&server, "/latest/meta-data/instance-id", "i-0abc123").await;
    mount_value(&server, "/latest/meta-data/instance-type", "c5.xlarge").await;
    mount_value(
        &server,
        "/latest/meta-data/placement/availability-zone",
        "eu-central-1a",
    )
    .await;
    mount_value(
        &server,
        "/latest/meta-data/local-hostname",
        "ip-10-0-0-1.eu-central-1.compute.internal",
    )
    .await;

    let identity = metadata(&server).node_identity().await.unwrap();

    assert_eq!(identity.instance_id, "i-0abc123");
    assert_eq!(identity.instance_type, "c5.xlarge");
    assert_eq!(identity.availability_zone, "eu-central-1a");
}

#[tokio::test]
async fn test_node_identity_falls_back_to_imdsv1() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/latest/api/token"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/instance-id"))
        .respond_with(ResponseTemplate::new(200).set_body_string("i-0abc123\n"))
        .mount(&server)
        .await;

    let identity = metadata(&server).node_identity().await.unwrap();

    assert_eq!(identity.instance_id, "i-0abc123");
    // Optional fields that are missing are left empty.
    assert_eq!(identity.instance_type, "");
}

#[tokio::test]
async fn test_missing_instance_id_is_an_error() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    let err = metadata(&server).node_identity().await.unwrap_err();
    assert!(matches!(err, MetadataError::NotFound { .. }));
}

#[tokio::test]
async fn test_reads_are_retried() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/instance-id"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_value(&server, "/latest/meta-data/instance-id", "i-0abc123").await;

    let value = metadata(&server)
        .get("/latest/meta-data/instance-id")
        .await
        .unwrap();
    assert_eq!(value.as_deref(), Some("i-0abc123"));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/instance-id"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = metadata(&server)
        .get("/latest/meta-data/instance-id")
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_spot_detector_without_notice() {
    let server = MockServer::start().await;
    mount_token(&server).await;

    let outcome = SpotDetector::new(metadata(&server)).poll().await.unwrap();
    assert!(outcome.is_empty());
}

#[tokio::test]
async fn test_spot_detector_with_notice() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_value(
        &server,
        "/latest/meta-data/spot/instance-action",
        r#"{"action": "terminate", "time": "2030-09-18T08:22:00Z"}"#,
    )
    .await;

    let detector = SpotDetector::new(metadata(&server));
    let first = detector.poll().await.unwrap();
    let second = detector.poll().await.unwrap();

    assert_eq!(first.interruptions.len(), 1);
    assert!(first.cancellations.is_empty());
    assert_eq!(first.interruptions[0].kind, EventKind::SpotInterruption);
    // Same notice, same event.
    assert_eq!(first.interruptions[0].event_id, second.interruptions[0].event_id);
}

#[tokio::test]
async fn test_spot_detector_reports_malformed_notice() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_value(&server, "/latest/meta-data/spot/instance-action", "{}").await;

    let err = SpotDetector::new(metadata(&server)).poll().await.unwrap_err();
    assert!(matches!(err, DetectorError::Parse { .. }));
}

#[tokio::test]
async fn test_maintenance_detector_splits_events() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_value(
        &server,
        "/latest/meta-data/events/maintenance/scheduled",
        r#"[
            {"NotBefore": "21 Jan 2030 09:00:43 GMT", "Code": "system-reboot",
             "Description": "scheduled reboot", "EventId": "instance-event-1",
             "NotAfter": "21 Jan 2030 09:17:23 GMT", "State": "active"},
            {"NotBefore": "20 Jan 2030 09:00:43 GMT", "Code": "system-reboot",
             "Description": "scheduled reboot", "EventId": "instance-event-0",
             "NotAfter": "20 Jan 2030 09:17:23 GMT", "State": "completed"}
        ]"#,
    )
    .await;

    let outcome = MaintenanceDetector::new(metadata(&server)).poll().await.unwrap();

    assert_eq!(outcome.interruptions.len(), 1);
    assert_eq!(outcome.interruptions[0].event_id.as_str(), "instance-event-1");
    assert_eq!(outcome.cancellations.len(), 1);
    assert_eq!(outcome.cancellations[0].event_id.as_str(), "instance-event-0");
}

#[tokio::test]
async fn test_maintenance_detector_surfaces_metadata_errors() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/latest/meta-data/events/maintenance/scheduled"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = MaintenanceDetector::new(metadata(&server))
        .poll()
        .await
        .unwrap_err();
    assert!(matches!(err, DetectorError::Metadata(MetadataError::Status { status: 503, .. })));
}
