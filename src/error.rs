//! Error types for the testbed server
//!
//! Every failure the lifecycle or the demo handlers can hit has a named
//! variant here so tests can assert on it instead of on a crashed thread.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// Lifecycle errors surfaced by `TestServer::start` / `TestServer::stop`
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server failed to start: {0}")]
    StartupFailure(String),

    #[error("server did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("server did not shut down within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("server was already started")]
    AlreadyStarted,

    #[error("server thread panicked")]
    BackgroundPanicked,

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors talking to the boot-admin server
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("admin server HTTP error: {0}")]
    Http(String),

    #[error("admin server returned status {0}")]
    Status(u16),

    #[error("failed to parse admin server response: {0}")]
    Parse(String),
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("no ports left to allocate")]
    PortsExhausted,
}

/// Errors raised inside request handlers
#[derive(Debug, Error, PartialEq)]
pub enum HandlerError {
    #[error("invalid query parameter {name}={value:?}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}
