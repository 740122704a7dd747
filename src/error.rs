use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Crate-wide error kinds (§7). Leaf errors from individual subsystems convert
/// into this at the API boundary; background tasks log and retry instead of
/// propagating it further (see `alert_engine`-style spawn loops).
#[derive(Debug, thiserror::Error)]
pub enum GrepwiseError {
    #[error("{0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient I/O error: {0}")]
    TransientIo(String),
    #[error("fatal storage error: {0}")]
    FatalStorage(String),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("event dropped under backpressure: {0}")]
    BackpressureDrop(String),
}

impl GrepwiseError {
    fn status(&self) -> StatusCode {
        match self {
            GrepwiseError::Validation(_) => StatusCode::BAD_REQUEST,
            GrepwiseError::NotFound(_) => StatusCode::NOT_FOUND,
            GrepwiseError::Unauthorized => StatusCode::UNAUTHORIZED,
            GrepwiseError::Conflict(_) => StatusCode::CONFLICT,
            GrepwiseError::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
            GrepwiseError::FatalStorage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GrepwiseError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            GrepwiseError::BackpressureDrop(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for GrepwiseError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("{self}");
        }
        (status, axum::Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<crate::query_lang::ast::QueryCompileError> for GrepwiseError {
    fn from(e: crate::query_lang::ast::QueryCompileError) -> Self {
        GrepwiseError::Validation(e.to_string())
    }
}

impl From<crate::index::IndexError> for GrepwiseError {
    fn from(e: crate::index::IndexError) -> Self {
        match e {
            crate::index::IndexError::Io(msg) => GrepwiseError::TransientIo(msg),
            crate::index::IndexError::Closed => GrepwiseError::FatalStorage("partition closed".into()),
        }
    }
}
