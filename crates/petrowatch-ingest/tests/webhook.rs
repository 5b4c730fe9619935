//! Delivery tests for `WebhookNotifier` against a wiremock endpoint.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use petrowatch_ingest::webhook::SIGNATURE_HEADER;
use petrowatch_ingest::{
    build_payload, sign_payload, verify_signature, Delivery, RunStatistics, RunStatus,
    WebhookConfig, WebhookError, WebhookNotifier, WebhookPayload,
};

const SECRET: &str = "test-signing-secret";

fn notifier(url: Option<String>) -> WebhookNotifier {
    WebhookNotifier::new(WebhookConfig {
        url,
        secret: Some(SECRET.to_owned()),
        max_attempts: 3,
        backoff_base: Duration::ZERO,
        timeout: Duration::from_secs(5),
        ..WebhookConfig::default()
    })
    .expect("notifier")
}

fn notifier_with_backoff(url: String, backoff_base: Duration) -> WebhookNotifier {
    WebhookNotifier::new(WebhookConfig {
        url: Some(url),
        secret: Some(SECRET.to_owned()),
        max_attempts: 3,
        backoff_base,
        timeout: Duration::from_secs(5),
        ..WebhookConfig::default()
    })
    .expect("notifier")
}

fn payload(status: RunStatus) -> WebhookPayload {
    let mut stats = RunStatistics::new(50);
    stats.regions_processed = 1;
    stats.subregions_processed = 2;
    stats.stations_seen = 5;
    stats.price_changes = 3;
    if status == RunStatus::Failed {
        stats.record_error("estados", "transient", "HTTP 503");
    }
    build_payload(
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 3, 1, 6, 5, 0).unwrap(),
        status,
        &stats,
        stats.errors(),
    )
}

#[tokio::test]
async fn signature_header_covers_the_exact_body_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/ingestion"))
        .and(header_exists(SIGNATURE_HEADER))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let sent = payload(RunStatus::Completed);
    let delivery = notifier(Some(format!("{}/hooks/ingestion", server.uri())))
        .send_completion_webhook(&sent)
        .await
        .expect("delivery should succeed");
    assert_eq!(delivery, Delivery::Delivered { attempts: 1 });

    let requests = server.received_requests().await.expect("recording enabled");
    let request = &requests[0];
    let header = request
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .expect("signature header");

    assert_eq!(header, sign_payload(SECRET, &request.body).unwrap());
    assert!(verify_signature(SECRET, &request.body, header));

    let received: WebhookPayload = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(received, sent);
}

#[tokio::test]
async fn unauthorized_response_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = notifier(Some(server.uri()))
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await;

    assert!(
        matches!(result, Err(WebhookError::Unauthorized { status: 401, .. })),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn forbidden_response_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let result = notifier(Some(server.uri()))
        .send_completion_webhook(&payload(RunStatus::Failed))
        .await;

    assert!(matches!(result, Err(WebhookError::Unauthorized { status: 403, .. })));
}

#[tokio::test]
async fn server_errors_are_retried_up_to_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let result = notifier(Some(server.uri()))
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await;

    assert!(matches!(result, Err(WebhookError::Status { status: 500, .. })));
}

#[tokio::test]
async fn retries_wait_base_then_double_base() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let result = notifier_with_backoff(server.uri(), Duration::from_millis(200))
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(WebhookError::Status { status: 503, .. })));
    // 200 ms before attempt 2, 400 ms before attempt 3.
    assert!(elapsed >= Duration::from_millis(600), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2_000), "waited {elapsed:?}");
}

#[tokio::test]
async fn unauthorized_response_does_not_back_off() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let result = notifier_with_backoff(server.uri(), Duration::from_secs(5))
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await;

    assert!(matches!(result, Err(WebhookError::Unauthorized { .. })));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn transient_failure_then_success_reports_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let delivery = notifier(Some(server.uri()))
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await
        .unwrap();

    assert_eq!(delivery, Delivery::Delivered { attempts: 2 });
}

#[tokio::test]
async fn every_attempt_sends_identical_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let _ = notifier(Some(server.uri()))
        .send_completion_webhook(&payload(RunStatus::Failed))
        .await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests.windows(2).all(|w| w[0].body == w[1].body));
    let signatures: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get(SIGNATURE_HEADER).cloned())
        .collect();
    assert!(signatures.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn missing_url_skips_delivery() {
    let delivery = notifier(None)
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Skipped);
}

#[tokio::test]
async fn missing_secret_skips_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(WebhookConfig {
        url: Some(server.uri()),
        secret: None,
        ..WebhookConfig::default()
    })
    .unwrap();

    assert!(!notifier.is_configured());
    let delivery = notifier
        .send_completion_webhook(&payload(RunStatus::Completed))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Skipped);
}
