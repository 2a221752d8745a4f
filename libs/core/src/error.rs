//! Shared error taxonomy. Every library crate surfaces one of these kinds;
//! the server maps them onto HTTP statuses in a single place.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("processor failure: {0}")]
    ProcessorFailure(String),

    #[error("price history conflict: {0}")]
    HistoryConflict(String),

    #[error("storage failure: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(err.into())
    }

    /// Stable machine-readable kind, used in `{detail, kind}` bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::UnsupportedFileType(_) => "unsupported_file_type",
            Self::ProcessorFailure(_) => "processor_failure",
            Self::HistoryConflict(_) => "history_conflict",
            Self::Storage(_) => "storage_failure",
            Self::DependencyUnavailable(_) => "dependency_unavailable",
            Self::Config(_) => "configuration_error",
        }
    }
}
