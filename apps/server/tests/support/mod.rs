//! Shared harness for router-level tests: an app over an in-memory store
//! and a temp artefact dir, plus request builders.
#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pricebot_core::Config;
use pricebot_server::jobs::JobRunnerHandle;
use pricebot_server::state::SharedState;
use pricebot_server::build_app_with_store;
use pricebot_store::Store;

pub const BOUNDARY: &str = "pricebot-test-boundary";

pub struct TestApp {
    pub router: Router,
    pub state: SharedState,
    // Held so the worker pool stays alive for the test's duration.
    #[allow(dead_code)]
    runner: JobRunnerHandle,
    #[allow(dead_code)]
    storage: tempfile::TempDir,
}

pub fn test_config() -> Config {
    Config {
        whatsapp_ingest_token: Some("test-token".into()),
        whatsapp_extract_debounce_seconds: 1,
        ..Config::default()
    }
}

pub async fn spawn_app(mut config: Config) -> TestApp {
    let storage = tempfile::tempdir().expect("tempdir");
    config.ingestion_storage_dir = storage.path().to_path_buf();
    config.database_url = ":memory:".into();
    let store = Store::open_in_memory().expect("store");
    let app = build_app_with_store(config, store).await.expect("app");
    TestApp {
        router: app.router,
        state: app.state,
        runner: app.runner,
        storage,
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// Multipart upload request for `/documents/upload`.
pub fn upload_request(
    filename: &str,
    content: &[u8],
    vendor_name: Option<&str>,
    processor: Option<&str>,
) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(b"\r\n");
    if let Some(vendor_name) = vendor_name {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"vendor_name\"\r\n\r\n{vendor_name}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(processor) = processor {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"processor\"\r\n\r\n{processor}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/documents/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

/// Polls the job-status endpoint until the job reaches a terminal state.
pub async fn wait_for_job(router: &Router, job_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = send(router, get(&format!("/documents/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK, "job status fetch failed: {body}");
        match body["status"].as_str() {
            Some("succeeded") | Some("failed") => return body,
            _ => tokio::time::sleep(std::time::Duration::from_millis(25)).await,
        }
    }
    panic!("job {job_id} never reached a terminal state");
}
