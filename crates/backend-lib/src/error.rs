// ============================
// crates/backend-lib/src/error.rs
// ============================
//! Central error type + Axum integration.
//!
//! Every failure that crosses the client boundary is reduced to a
//! structured `{kind, message}` object; raw errors never leave the
//! process. Authorization and validation failures go back to the
//! originating connection only and are never broadcast.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application error taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    /// Authorization check failed. User-visible, no retry.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Room, message or session absent. User-visible.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invariant-protecting rejection, e.g. a second active meeting for
    /// the same channel. The caller may retry by joining instead.
    #[error("conflict: {0}")]
    Conflict(String),

    /// External provider call failed during resource creation. Safe to
    /// retry; teardown-path provider failures are swallowed, not raised.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Request failed validation before touching any state.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unexpected failure. Logged in full, generic message to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable kind discriminator used in the wire-level error object.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Internal(_) => "internal",
        }
    }

    /// HTTP status for the webhook route and any future REST surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PermissionDenied(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.public_message(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::Internal("event channel closed".to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(AppError::PermissionDenied("x".into()).kind(), "permission_denied");
        assert_eq!(AppError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(AppError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(
            AppError::UpstreamUnavailable("x".into()).kind(),
            "upstream_unavailable"
        );
        assert_eq!(AppError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(AppError::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::PermissionDenied("no".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Conflict("busy".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::UpstreamUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = AppError::Internal("lock poisoned at store.rs:42".into());
        assert_eq!(err.public_message(), "an internal error occurred");
        // but the Display impl keeps the detail for logs
        assert!(err.to_string().contains("store.rs:42"));
    }

    #[test]
    fn into_response_sets_status() {
        let resp = AppError::NotFound("no such room".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
