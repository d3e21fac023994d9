//! Error taxonomy shared across the ingestion, persistence, and retrieval paths.
//!
//! [`CoreError`] is the one error type that crosses module boundaries inside
//! this crate. It exists because the HTTP surface, the bus worker, and the
//! orchestrator each need to react differently to the *same* underlying
//! failure (skip vs retry vs terminal-fail vs 4xx), and an opaque `anyhow`
//! chain can't carry that distinction. `anyhow` is still used at CLI
//! entry points and for genuinely unstructured glue errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The error taxonomy described in the spec's error-handling design: each
/// variant carries its own propagation rule (see `IntoResponse` below and
/// [`CoreError::is_retriable`]).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Lost a claim race. Callers treat this as a skip, not a failure.
    #[error("race lost: {0}")]
    Race(String),

    /// Retriable by the producer of the call (429/5xx/parse failure).
    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    /// `"TypeName: message"` — the stable, greppable shape stored on
    /// Document/Task error_message columns (spec section 7).
    pub fn stable_message(&self) -> String {
        let (kind, msg): (&str, &str) = match self {
            CoreError::NotFound(m) => ("NotFound", m),
            CoreError::Unsupported(m) => ("Unsupported", m),
            CoreError::Upstream(m) => ("Upstream", m),
            CoreError::Validation(m) => ("Validation", m),
            CoreError::Race(m) => ("Race", m),
            CoreError::Transient(m) => ("Transient", m),
            CoreError::Fatal(m) => ("Fatal", m),
        };
        format!("{}: {}", kind, msg)
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound(e.to_string()),
            other => CoreError::Upstream(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            CoreError::Transient(e.to_string())
        } else {
            CoreError::Upstream(e.to_string())
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

/// HTTP translation per the spec's propagation table: Validation -> 400,
/// NotFound -> 404, everything else that reaches the HTTP boundary -> 500.
/// Race never reaches here (callers treat it as a skip); Transient is
/// retried by its producer before it would surface.
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Unsupported(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.stable_message(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
