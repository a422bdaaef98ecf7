use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use billsync_core::{ApiError, ApiErrorClass, BillsyncClient, RecordAction, SyncRecord};

#[tokio::test]
async fn create_record_posts_payload_with_bearer_header() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/invoices"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({"number": "A-1001", "total_cents": 125000})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "srv-77",
            "revision": 1
        })))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let record = client
        .create_record("invoices", &json!({"number": "A-1001", "total_cents": 125000}))
        .await
        .unwrap();

    assert_eq!(record.id, "srv-77");
    assert_eq!(record.revision, Some(1));
}

#[tokio::test]
async fn update_record_puts_to_row_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/invoices/inv-12"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({"status": "paid"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "inv-12",
            "revision": 4,
            "synced_at": "2025-06-01T10:00:00Z"
        })))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let record = client
        .update_record("invoices", "inv-12", &json!({"status": "paid"}))
        .await
        .unwrap();

    assert_eq!(record.revision, Some(4));
    assert_eq!(record.synced_at.as_deref(), Some("2025-06-01T10:00:00Z"));
}

#[tokio::test]
async fn delete_record_accepts_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/customers/c-3"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.delete_record("customers", "c-3").await.unwrap();
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/invoices"))
        .respond_with(ResponseTemplate::new(422).set_body_string("total_cents must be positive"))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .create_record("invoices", &serde_json::json!({"total_cents": -5}))
        .await
        .expect_err("expected validation failure");

    match &err {
        ApiError::Api { status, body, .. } => {
            assert_eq!(status.as_u16(), 422);
            assert_eq!(body, "total_cents must be positive");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn rate_limited_response_exposes_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/invoices/inv-9"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .update_record("invoices", "inv-9", &serde_json::json!({}))
        .await
        .expect_err("expected rate limit");

    assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
    assert!(err.is_retryable());
    assert_eq!(err.retry_after_secs(), Some(7));
}

#[tokio::test]
async fn server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/payments/p-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .delete_record("payments", "p-1")
        .await
        .expect_err("expected server error");

    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn submit_batch_reports_per_item_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/sync/batch"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "operations": [
                {
                    "table": "invoices",
                    "row_id": "inv-1",
                    "action": "insert",
                    "payload": {"number": "A-1"}
                },
                {
                    "table": "invoices",
                    "row_id": "inv-2",
                    "action": "delete",
                    "payload": {}
                }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "applied": 1,
            "failures": [
                {"index": 1, "error": "row is referenced by a payment"}
            ]
        })))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    let outcome = client
        .submit_batch(&[
            SyncRecord {
                table: "invoices".into(),
                row_id: "inv-1".into(),
                action: RecordAction::Insert,
                payload: json!({"number": "A-1"}),
            },
            SyncRecord {
                table: "invoices".into(),
                row_id: "inv-2".into(),
                action: RecordAction::Delete,
                payload: json!({}),
            },
        ])
        .await
        .unwrap();

    assert_eq!(outcome.applied, 1);
    assert!(!outcome.is_complete());
    assert_eq!(outcome.failures[0].index, 1);
    assert_eq!(outcome.failures[0].error, "row is referenced by a payment");
}

#[tokio::test]
async fn health_check_succeeds_on_no_content() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.health().await.unwrap();
}

#[tokio::test]
async fn health_check_fails_when_backend_is_down() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = BillsyncClient::with_base_url(&server.uri(), "test-token").unwrap();
    assert!(client.health().await.is_err());
}
