//! Error taxonomy for the notification engine.
//!
//! Caller-correctable errors (validation, permission, not-found, invalid
//! state) map to 4xx responses with their message intact. Everything else is
//! logged with full context and surfaced as a generic 500; the caller never
//! sees store or push internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing caller input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not legal in the entity's current lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller role does not permit the operation.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Optimistic transaction conflict that survived the bounded retry loop.
    #[error("Store contention: {0}")]
    TransientStore(String),

    /// Store I/O or (de)serialization fault.
    #[error("Store error: {0}")]
    Store(String),

    /// Push fanout delivery failed.
    #[error("Push error: {0}")]
    Push(String),

    /// Catch-all for unexpected downstream failures.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("document decode: {e}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Push(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Error::Permission(m) => (StatusCode::FORBIDDEN, m.clone()),
            Error::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Error::InvalidState(m) => (StatusCode::CONFLICT, m.clone()),
            Error::TransientStore(_)
            | Error::Store(_)
            | Error::Push(_)
            | Error::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_validation() {
        let err = Error::Validation("wardNumber out of range".to_string());
        assert_eq!(err.to_string(), "Validation error: wardNumber out of range");
    }

    #[test]
    fn test_display_not_found() {
        let err = Error::NotFound("notification abc".to_string());
        assert_eq!(err.to_string(), "Not found: notification abc");
    }

    #[test]
    fn test_display_invalid_state() {
        let err = Error::InvalidState("response window closed".to_string());
        assert_eq!(err.to_string(), "Invalid state: response window closed");
    }

    #[test]
    fn test_from_serde_json() {
        let decode = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = decode.into();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
