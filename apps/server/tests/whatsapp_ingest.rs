//! Collector endpoint tests: auth gates, signature freshness, rate limiting,
//! the dedupe decision ladder, and debounced extraction.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};

use pricebot_core::Config;
use pricebot_server::auth::sign_ingest_body;
use pricebot_store::vendors;
use pricebot_telemetry::counter;
use support::{get, send, spawn_app, test_config};

fn ingest_request(body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/integrations/whatsapp/ingest")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("x-ingest-token", token);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

fn signed_request(body: &Value, token: &str, secret: &str, timestamp: i64) -> Request<Body> {
    let raw = body.to_string();
    let signature = sign_ingest_body(secret, timestamp, raw.as_bytes());
    Request::builder()
        .method("POST")
        .uri("/integrations/whatsapp/ingest")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-ingest-token", token)
        .header("x-signature", signature)
        .header("x-signature-timestamp", timestamp.to_string())
        .body(Body::from(raw))
        .expect("request")
}

fn batch(messages: Value) -> Value {
    json!({ "client_id": "c1", "messages": messages })
}

#[tokio::test]
async fn token_gate() {
    let app = spawn_app(test_config()).await;
    let body = batch(json!([{ "chat_title": "Deals", "text": "iPhone 15 - $900" }]));

    let (status, _) = send(&app.router, ingest_request(&body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app.router, ingest_request(&body, Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_server_configuration_is_503() {
    let app = spawn_app(Config {
        whatsapp_ingest_token: None,
        ..test_config()
    })
    .await;
    let body = batch(json!([{ "chat_title": "Deals", "text": "iPhone 15 - $900" }]));
    let (status, _) = send(&app.router, ingest_request(&body, Some("anything"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn dedupe_by_message_id_then_content_hash() {
    let app = spawn_app(test_config()).await;
    let body = batch(json!([{
        "chat_title": "Deals",
        "text": "iPhone 15 - $900",
        "message_id": "M1",
        "sender_name": "Ana"
    }]));

    let (status, first) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["accepted"], 1);
    assert_eq!(first["created"], 1);
    assert_eq!(first["created_chats"], 1);
    assert_eq!(first["decisions"][0]["status"], "created");
    assert!(first["decisions"][0]["whatsapp_message_id"].is_string());
    assert!(first["request_id"].is_string());

    // Byte-identical repost: zero created, deduped by platform message id.
    let (status, second) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["accepted"], 1);
    assert_eq!(second["created"], 0);
    assert_eq!(second["deduped"], 1);
    assert_eq!(second["decisions"][0]["reason"], "duplicate_message_id");

    // Same content without a message id within the window: content hash key.
    let no_id = batch(json!([{
        "chat_title": "Deals",
        "text": "iPhone 15 - $900",
        "sender_name": "Ana"
    }]));
    let (_, third) = send(&app.router, ingest_request(&no_id, Some("test-token"))).await;
    assert_eq!(third["created"], 0);
    assert_eq!(
        third["decisions"][0]["reason"],
        "duplicate_content_hash_within_window"
    );

    // A sender rename voids the content-hash key, so it lands as created.
    let renamed = batch(json!([{
        "chat_title": "Deals",
        "text": "iPhone 15 - $900",
        "sender_name": "Ana Phones"
    }]));
    let (_, fourth) = send(&app.router, ingest_request(&renamed, Some("test-token"))).await;
    assert_eq!(fourth["created"], 1);
}

#[tokio::test]
async fn filtered_events_are_skipped() {
    let app = spawn_app(test_config()).await;
    let body = batch(json!([
        { "chat_title": "Deals", "text": "   " },
        { "chat_title": "Deals", "text": "<Media omitted>" },
        { "chat_title": "Deals", "text": "👍" }
    ]));
    let (status, response) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
    assert_eq!(status, StatusCode::OK, "{response}");
    assert_eq!(response["created"], 0);
    assert_eq!(response["decisions"][0]["reason"], "empty_text");
    assert_eq!(response["decisions"][1]["reason"], "filtered_event");
    assert_eq!(response["decisions"][2]["reason"], "filtered_event");
}

#[tokio::test]
async fn schema_violations_are_422_and_bad_json_is_400() {
    let app = spawn_app(test_config()).await;

    let empty = batch(json!([]));
    let (status, body) = send(&app.router, ingest_request(&empty, Some("test-token"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("messages"));

    let long_title = batch(json!([{ "chat_title": "x".repeat(201), "text": "hi" }]));
    let (status, body) = send(&app.router, ingest_request(&long_title, Some("test-token"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("chat_title"));

    let raw = Request::builder()
        .method("POST")
        .uri("/integrations/whatsapp/ingest")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-ingest-token", "test-token")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app.router, raw).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stale_signature_is_403() {
    let app = spawn_app(Config {
        whatsapp_ingest_hmac_secret: Some("hmac-secret".into()),
        ..test_config()
    })
    .await;
    let body = batch(json!([{ "chat_title": "Deals", "text": "iPhone 15 - $900" }]));
    let now = chrono::Utc::now().timestamp();

    let (status, _) = send(
        &app.router,
        signed_request(&body, "test-token", "hmac-secret", now),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Ten minutes old against the default 300 s TTL.
    let (status, _) = send(
        &app.router,
        signed_request(&body, "test-token", "hmac-secret", now - 600),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Valid timestamp, wrong secret.
    let (status, _) = send(
        &app.router,
        signed_request(&body, "test-token", "other-secret", now),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Signature required once the secret is configured.
    let (status, _) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rate_limit_answers_429_with_retry_after() {
    let app = spawn_app(Config {
        whatsapp_ingest_rate_limit_per_minute: 2,
        whatsapp_ingest_rate_limit_burst: 2,
        ..test_config()
    })
    .await;

    for i in 0..2 {
        let body = batch(json!([{ "chat_title": "Deals", "text": format!("item {i} $10.00") }]));
        let (status, _) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let body = batch(json!([{ "chat_title": "Deals", "text": "third $10.00" }]));
    let response = tower::ServiceExt::oneshot(app.router.clone(), ingest_request(&body, Some("test-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    // A different client still has budget.
    let other = json!({ "client_id": "c2", "messages": [{ "chat_title": "Deals", "text": "ok $10.00" }] });
    let (status, _) = send(&app.router, ingest_request(&other, Some("test-token"))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn debounced_extraction_coalesces_and_ingests() {
    let app = spawn_app(test_config()).await;

    // Vendor whose name matches the chat title, so the chat auto-maps.
    app.state
        .store
        .with_conn(|conn| {
            vendors::get_or_create(conn, "Acme Deals", pricebot_core::timefmt::now()).map(|_| ())
        })
        .await
        .unwrap();

    for text in ["iPhone 15 $900", "Pixel 9 $700"] {
        let body = batch(json!([{ "chat_title": "Acme Deals", "text": text }]));
        let (status, _) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
        assert_eq!(status, StatusCode::OK);
    }

    // One debounce window later: exactly one extraction, two offers.
    tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
    assert_eq!(app.state.metrics.get(counter::EXTRACTIONS_RUN), 1);

    let (_, offers_body) = send(&app.router, get("/offers")).await;
    let offers = offers_body["offers"].as_array().unwrap();
    assert_eq!(offers.len(), 2, "{offers_body}");

    let (_, vendors_body) = send(&app.router, get("/vendors")).await;
    let vendor_id = vendors_body["vendors"][0]["id"].as_str().unwrap();
    for offer in offers {
        assert_eq!(offer["vendor_id"].as_str().unwrap(), vendor_id);
    }

    // A later duplicate batch creates nothing and schedules no extraction.
    let body = batch(json!([{ "chat_title": "Acme Deals", "text": "iPhone 15 $900" }]));
    let (_, response) = send(&app.router, ingest_request(&body, Some("test-token"))).await;
    assert_eq!(response["created"], 0);
}
