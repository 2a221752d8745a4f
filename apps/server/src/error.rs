//! One place where the shared error taxonomy becomes HTTP.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use pricebot_core::Error;

pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UnsupportedFileType(_) => StatusCode::BAD_REQUEST,
            Error::ProcessorFailure(_) | Error::HistoryConflict(_) | Error::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::DependencyUnavailable(_) | Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = Json(json!({
            "detail": self.0.to_string(),
            "kind": self.0.kind(),
        }));
        let mut response = (status, body).into_response();
        if let Error::RateLimited { retry_after_secs } = &self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// 400 for malformed payloads (bad JSON, bad multipart), where 422 would
/// overstate how far parsing got.
pub fn bad_request(detail: impl Into<String>) -> Response {
    let detail = detail.into();
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "detail": detail, "kind": "invalid_request" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError(Error::invalid("x")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError(Error::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(Error::UnsupportedFileType("docx".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(Error::RateLimited {
                retry_after_secs: 7
            })
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ApiError(Error::RateLimited {
            retry_after_secs: 7,
        })
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }
}
