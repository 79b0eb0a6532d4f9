use thiserror::Error;

use crate::types::TimeWindow;

/// Failures at the catalog (source) boundary.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("No releases found between {}", .0)]
    NoItemsInWindow(TimeWindow),

    #[error("Catalog request timed out")]
    Timeout,

    #[error("Catalog returned unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Malformed catalog response: {0}")]
    Malformed(String),

    #[error("Catalog request failed: {0}")]
    Request(String),
}

impl SourceError {
    /// Conditions the scheduler retries with the same window after a cool-down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SourceError::Unavailable(_) | SourceError::NoItemsInWindow(_) | SourceError::Timeout
        )
    }
}

/// Failures at the notification (sink) boundary.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("Notification request timed out")]
    Timeout,

    #[error("Failed to build notification payload: {0}")]
    Payload(String),

    #[error("Notification request failed: {0}")]
    Request(String),
}

impl SinkError {
    /// Conditions the scheduler recovers from by rewinding the window.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_) | SinkError::Timeout)
    }
}

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}
