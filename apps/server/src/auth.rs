//! Request-id tagging, the WhatsApp ingest gate (shared token + optional
//! HMAC signature with a freshness window), and basic auth for operator
//! routes.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use pricebot_core::{Config, Error};

type HmacSha256 = Hmac<Sha256>;

pub const INGEST_TOKEN_HEADER: &str = "x-ingest-token";
pub const SIGNATURE_HEADER: &str = "x-signature";
pub const SIGNATURE_TIMESTAMP_HEADER: &str = "x-signature-timestamp";

pub async fn with_request_id(mut req: Request<Body>, next: Next) -> Response {
    let rid = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(rid.clone()));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&rid) {
        res.headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    res
}

#[derive(Clone)]
pub struct RequestId(pub String);

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Shared-token check for the collector endpoint. A missing server-side
/// token is a deployment problem, not a client one.
pub fn check_ingest_token(config: &Config, headers: &HeaderMap) -> Result<(), Error> {
    let Some(expected) = config.whatsapp_ingest_token.as_deref() else {
        return Err(Error::Config("whatsapp ingest token not configured".into()));
    };
    let provided = headers
        .get(INGEST_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided.is_empty() || !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return Err(Error::Unauthorized);
    }
    Ok(())
}

/// Verifies `hex(HMAC-SHA256(secret, timestamp + "." + body))` and rejects
/// timestamps outside the TTL. No secret configured means the check is off.
pub fn check_ingest_signature(
    config: &Config,
    headers: &HeaderMap,
    body: &[u8],
    now_unix: i64,
) -> Result<(), Error> {
    let Some(secret) = config.whatsapp_ingest_hmac_secret.as_deref() else {
        return Ok(());
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let timestamp = headers
        .get(SIGNATURE_TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if signature.is_empty() || timestamp.is_empty() {
        return Err(Error::Forbidden("missing signature headers".into()));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| Error::Forbidden("invalid signature timestamp".into()))?;
    let ttl = config.whatsapp_ingest_signature_ttl_seconds as i64;
    if (now_unix - ts).abs() > ttl {
        return Err(Error::Forbidden("signature timestamp outside ttl".into()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Forbidden("invalid hmac secret".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
        return Err(Error::Forbidden("signature mismatch".into()));
    }
    Ok(())
}

/// `Authorization: Basic` gate for `/admin/*`. Mounted only when the config
/// enables it (credentials set, non-local environment).
pub async fn require_basic_auth(
    axum::extract::State(state): axum::extract::State<crate::state::SharedState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let config = &state.config;
    if !config.admin_auth_enabled() {
        return next.run(req).await;
    }
    let (Some(username), Some(password)) =
        (config.admin_username.as_deref(), config.admin_password.as_deref())
    else {
        return next.run(req).await;
    };
    let expected = B64.encode(format!("{username}:{password}"));

    let ok = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .map(|provided| constant_time_eq(provided.as_bytes(), expected.as_bytes()))
        .unwrap_or(false);
    if !ok {
        let mut response = crate::error::ApiError(Error::Unauthorized).into_response();
        response.headers_mut().insert(
            axum::http::header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"pricebot\""),
        );
        return response;
    }
    next.run(req).await
}

/// Computes the signature a well-behaved collector sends; tests and the
/// collector docs share this definition.
pub fn sign_ingest_body(secret: &str, timestamp: i64, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
