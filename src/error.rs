//! Handler-facing error type.

use thiserror::Error;

/// Failure returned by a wrapped handler.
///
/// Carries the status class the response layer surfaces. Statuses >= 500
/// count against the circuit breaker; 4xx-class statuses are caller
/// mistakes and leave resilience state untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("handler failed with status {status}: {message}")]
pub struct HandlerError {
    status: u16,
    message: String,
}

impl HandlerError {
    /// Create a handler error with an explicit status.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// 500-class internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    /// Malformed or unprocessable caller input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// The caller lacks a required capability.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    /// The addressed entity does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// A downstream dependency failed.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this failure counts against the circuit breaker.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }
}
