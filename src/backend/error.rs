//! Backend error types

use std::time::Duration;
use thiserror::Error;

/// Backend error with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            BackendErrorKind::Timeout,
            format!("Request timed out after {}s", after.as_secs()),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ServerError, message)
    }

    pub fn client_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ClientError, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Malformed, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Aborted, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == BackendErrorKind::Timeout
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", body.trim())
        };
        match status.as_u16() {
            404 => Self::not_found(message),
            400..=499 => Self::client_error(message),
            500..=599 => Self::server_error(message),
            _ => Self::new(BackendErrorKind::Unknown, message),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(BackendErrorKind::Timeout, format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else if err.is_decode() {
            Self::malformed(format!("Failed to decode response: {err}"))
        } else {
            Self::network(format!("Request failed: {err}"))
        }
    }
}

/// Error classification, reported to the UI alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Backend unreachable or connection dropped mid-body
    Network,
    /// Request exceeded its time bound
    Timeout,
    /// 404
    NotFound,
    /// Other 4xx
    ClientError,
    /// 5xx
    ServerError,
    /// Success status but a body we could not interpret
    Malformed,
    /// Request task ended without reporting an outcome
    Aborted,
    Unknown,
}
