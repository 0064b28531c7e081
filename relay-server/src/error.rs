//! # Error kinds (spec §7)
//!
//! Typed relay-side errors, each mapped to the status code or protocol
//! behavior spec.md §7 names. `thiserror` supplies the `Display`/`Error`
//! impls; `IntoResponse` does the HTTP mapping for the axum handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing or invalid api key")]
    AuthRejected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("tunnel not found")]
    TunnelNotFound,

    #[error("tunnel not connected")]
    TunnelNotConnected,

    #[error("tunnel agent not connected")]
    NoOwner,

    #[error("agent request timed out")]
    AgentTimeout,

    #[error("forwarded request timed out")]
    ForwardTimeout,

    #[error("websocket upgrades are not supported through the tunnel")]
    NotImplemented,

    #[error("bus error: {0}")]
    Bus(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            RelayError::AuthRejected => (StatusCode::UNAUTHORIZED, self.to_string()),
            RelayError::Protocol(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            RelayError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            RelayError::TunnelNotFound => (StatusCode::NOT_FOUND, self.to_string()),
            RelayError::TunnelNotConnected => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            RelayError::NoOwner => (StatusCode::BAD_GATEWAY, self.to_string()),
            RelayError::AgentTimeout => (StatusCode::BAD_GATEWAY, self.to_string()),
            RelayError::ForwardTimeout => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            RelayError::NotImplemented => (StatusCode::NOT_IMPLEMENTED, self.to_string()),
            RelayError::Bus(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, axum::Json(json!({ "error": detail }))).into_response()
    }
}
