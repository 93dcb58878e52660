//! Typed error hierarchy for the reconciler.
//!
//! Three top-level enums cover the three collaborator boundaries:
//! - `TrackerError`: remote tracker reads and writes
//! - `GeneratorError`: the content-generation capability
//! - `CycleError`: stage failures reported in the cycle summary

use std::time::Duration;

use thiserror::Error;

/// Errors from the tracker interface.
///
/// `RateLimited` and `Transient` are retried by the retry policy; every other
/// variant is fatal for the single operation that raised it.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Rate limited by tracker (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transient tracker error: {0}")]
    Transient(String),

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Tracker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed tracker response: {0}")]
    Malformed(String),
}

impl TrackerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Classify an HTTP status code returned by the tracker.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message: String = body.chars().take(300).collect();
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::PermissionDenied(message),
            404 => Self::NotFound { what: message },
            500..=599 => Self::Transient(format!("HTTP {}: {}", status, message)),
            _ => Self::Rejected { status, message },
        }
    }
}

/// Errors from the content-generation capability.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Content generator unavailable: {0}")]
    Unavailable(String),

    #[error("Content generation failed: {0}")]
    Failed(String),

    #[error("Could not interpret generator output: {0}")]
    Unparsable(String),
}

/// A stage-level failure. Recorded in the cycle summary; never aborts a cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Stage '{stage}' could not read tracker state: {source}")]
    Observe {
        stage: &'static str,
        #[source]
        source: TrackerError,
    },

    #[error("No active bucket on the board")]
    NoActiveBucket,
}
