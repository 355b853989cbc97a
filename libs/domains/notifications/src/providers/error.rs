//! Provider error classification.
//!
//! Every provider maps its failures onto the same three classes so that the
//! dispatcher and the retry policy never need provider-specific knowledge.

use reqwest::StatusCode;
use stream_worker::ErrorCategory;
use thiserror::Error;

/// How a provider failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limiting, 5xx, timeouts and network failures.
    Retryable,
    /// Bad requests, oversized payloads, unusable configuration.
    Terminal,
    /// Credentials were rejected.
    Unauthenticated,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} rate limited the request: {body}")]
    RateLimited { provider: String, body: String },

    #[error("{provider} server error ({status}): {body}")]
    Server {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} request timed out: {message}")]
    Timeout { provider: String, message: String },

    #[error("{provider} network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} rejected an oversized payload: {body}")]
    PayloadTooLarge { provider: String, body: String },

    #[error("{provider} rejected the credentials ({status}): {body}")]
    Unauthenticated {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} rejected the request ({status}): {body}")]
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} configuration is missing '{field}'")]
    MissingConfiguration { provider: String, field: String },

    #[error("{provider} returned an unexpected response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    /// Classify an unsuccessful HTTP status.
    pub fn from_status(provider: &str, status: u16, body: impl Into<String>) -> Self {
        let provider = provider.to_string();
        let body = body.into();
        match status {
            429 => ProviderError::RateLimited { provider, body },
            413 => ProviderError::PayloadTooLarge { provider, body },
            401 | 403 => ProviderError::Unauthenticated {
                provider,
                status,
                body,
            },
            500..=599 => ProviderError::Server {
                provider,
                status,
                body,
            },
            _ => ProviderError::Rejected {
                provider,
                status,
                body,
            },
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        let provider = provider.to_string();
        if err.is_timeout() {
            ProviderError::Timeout {
                provider,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::from_status(&provider, status.as_u16(), err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse {
                provider,
                message: err.to_string(),
            }
        } else {
            ProviderError::Network {
                provider,
                message: err.to_string(),
            }
        }
    }

    /// Read the body of a failed response and classify it.
    pub async fn from_response(provider: &str, response: reqwest::Response) -> Self {
        let status: StatusCode = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_status(provider, status.as_u16(), body)
    }

    pub fn missing(provider: &str, field: &str) -> Self {
        ProviderError::MissingConfiguration {
            provider: provider.to_string(),
            field: field.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Server { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Network { .. } => ErrorClass::Retryable,
            ProviderError::Unauthenticated { .. } => ErrorClass::Unauthenticated,
            ProviderError::PayloadTooLarge { .. }
            | ProviderError::Rejected { .. }
            | ProviderError::MissingConfiguration { .. }
            | ProviderError::InvalidResponse { .. } => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }

    /// HTTP status behind the error, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::RateLimited { .. } => Some(429),
            ProviderError::PayloadTooLarge { .. } => Some(413),
            ProviderError::Server { status, .. }
            | ProviderError::Unauthenticated { status, .. }
            | ProviderError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a status poll failing this way should stop future polls for
    /// the configuration.
    pub fn disables_status_checks(&self) -> bool {
        matches!(self.status(), Some(400 | 401 | 403))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::RateLimited { .. } => ErrorCategory::RateLimited,
            _ if self.is_retryable() => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let cases = [
            (429, ErrorClass::Retryable),
            (500, ErrorClass::Retryable),
            (503, ErrorClass::Retryable),
            (413, ErrorClass::Terminal),
            (408, ErrorClass::Terminal),
            (400, ErrorClass::Terminal),
            (404, ErrorClass::Terminal),
            (422, ErrorClass::Terminal),
            (401, ErrorClass::Unauthenticated),
            (403, ErrorClass::Unauthenticated),
        ];

        for (status, expected) in cases {
            assert_eq!(
                ProviderError::from_status("sendgrid", status, "").class(),
                expected,
                "status {}",
                status
            );
        }
    }

    #[test]
    fn test_http_408_is_not_a_timeout() {
        let err = ProviderError::from_status("mailgun", 408, "");
        assert!(!err.is_timeout());
        assert!(!err.is_retryable());
        assert!(matches!(err, ProviderError::Rejected { status: 408, .. }));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ProviderError::from_status("twilio", 429, "").category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            ProviderError::from_status("twilio", 502, "").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            ProviderError::from_status("twilio", 401, "").category(),
            ErrorCategory::Permanent
        );
        assert_eq!(
            ProviderError::missing("twilio", "authToken").category(),
            ErrorCategory::Permanent
        );
    }

    #[test]
    fn test_status_check_disabling_statuses() {
        assert!(ProviderError::from_status("mailgun", 400, "").disables_status_checks());
        assert!(ProviderError::from_status("mailgun", 401, "").disables_status_checks());
        assert!(ProviderError::from_status("mailgun", 403, "").disables_status_checks());
        assert!(!ProviderError::from_status("mailgun", 404, "").disables_status_checks());
        assert!(!ProviderError::from_status("mailgun", 500, "").disables_status_checks());
    }
}
