//! Error types for the PyGuide tutor service.
//!
//! Configuration errors carry an actionable suggestion and are reported at
//! start-up. Backend errors are single-line messages: the stream relay embeds
//! them verbatim in the error fragment it sends to the browser.

use std::path::PathBuf;

/// A specialized `Result` type for PyGuide operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while configuring or running the tutor service.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your pyguide.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Model Backend Errors
    // ========================================================================
    /// The backend could not be reached or the connection broke.
    #[error("Connection error: could not reach the model backend at {url} ({message})")]
    BackendUnreachable {
        /// Endpoint that was being called.
        url: String,
        /// Transport-level description.
        message: String,
    },

    /// The backend answered with a non-success HTTP status.
    #[error("Backend returned HTTP {status}: {body}")]
    BackendStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        body: String,
    },

    /// The backend reported an error inside the event stream.
    #[error("Backend error: {message}")]
    BackendReported {
        /// Message supplied by the backend.
        message: String,
    },

    /// The event stream could not be read or decoded.
    #[error("Malformed stream from the model backend: {message}")]
    MalformedStream {
        /// Description of the decoding failure.
        message: String,
    },

    /// No chunk arrived within the configured idle timeout.
    #[error("Timed out after {timeout_secs}s waiting for the model backend")]
    BackendTimeout {
        /// The timeout duration in seconds.
        timeout_secs: u64,
    },
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `BackendUnreachable` error.
    #[must_use]
    pub fn backend_unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a new `BackendStatus` error.
    ///
    /// Whitespace in the body is collapsed so the message stays on one line.
    #[must_use]
    pub fn backend_status(status: u16, body: &str) -> Self {
        let body = body.split_whitespace().collect::<Vec<_>>().join(" ");
        Self::BackendStatus { status, body }
    }

    /// Creates a new `BackendReported` error.
    #[must_use]
    pub fn backend_reported(message: impl Into<String>) -> Self {
        Self::BackendReported {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedStream` error.
    #[must_use]
    pub fn malformed_stream(message: impl Into<String>) -> Self {
        Self::MalformedStream {
            message: message.into(),
        }
    }

    /// Creates a new `BackendTimeout` error.
    #[must_use]
    pub const fn backend_timeout(timeout_secs: u64) -> Self {
        Self::BackendTimeout { timeout_secs }
    }
}
