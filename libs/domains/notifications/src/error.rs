//! Error types for the notifications domain.

use crate::providers::ProviderError;
use stream_worker::{ErrorCategory, StreamError};
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur while preparing, routing or sending a notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// A stored routing bundle is gone (expired or never written).
    #[error("Routing bundle not found: {0}")]
    BundleNotFound(String),

    /// An inbound or inter-stage message could not be understood.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Provider configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No provider is registered for a configuration's provider key.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider rejected or failed the request.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Content rendering failed.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Bundle or catalog storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Enqueueing onto a stream or the delayed set failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Payload (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Retry category used by the stream worker.
    ///
    /// Data and validation errors are terminal, provider errors follow the
    /// provider's classification, and infrastructure errors are retryable.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NotificationError::BundleNotFound(_)
            | NotificationError::InvalidMessage(_)
            | NotificationError::InvalidConfiguration(_)
            | NotificationError::UnknownProvider(_)
            | NotificationError::Template(_)
            | NotificationError::Serialization(_) => ErrorCategory::Permanent,
            NotificationError::Provider(e) => e.category(),
            NotificationError::Storage(_)
            | NotificationError::Queue(_)
            | NotificationError::Internal(_) => ErrorCategory::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the error is a known data or provider error that is explained
    /// to the customer through the audit trail alone. Everything else is an
    /// internal failure and is also logged at error level for operators.
    pub fn is_customer_facing(&self) -> bool {
        !matches!(
            self,
            NotificationError::Storage(_)
                | NotificationError::Queue(_)
                | NotificationError::Internal(_)
        )
    }
}

impl From<redis::RedisError> for NotificationError {
    fn from(err: redis::RedisError) -> Self {
        NotificationError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Serialization(err.to_string())
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<StreamError> for NotificationError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Serialization(msg) => NotificationError::Serialization(msg),
            other => NotificationError::Queue(other.to_string()),
        }
    }
}

impl From<NotificationError> for StreamError {
    fn from(err: NotificationError) -> Self {
        match err.category() {
            ErrorCategory::Permanent => StreamError::permanent(err.to_string()),
            ErrorCategory::RateLimited => StreamError::rate_limited(err.to_string()),
            ErrorCategory::Transient => StreamError::transient(err.to_string()),
        }
    }
}
