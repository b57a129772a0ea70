//! Error types for enrichment.

use thiserror::Error;

/// Result type alias for provider calls.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors raised at the provider boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider asked us to slow down (HTTP 429).
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Connection-level failure before a response arrived.
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// HTTP 5xx.
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// HTTP 401 or 403.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response arrived but did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The provider is misconfigured.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A scripted failure from a test double.
    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Network(_)
                | ProviderError::Timeout
                | ProviderError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

/// The reply text held no usable array of enrichment records.
#[derive(Debug, Error)]
pub enum ParseResponseError {
    #[error("reply is empty")]
    Empty,

    #[error("reply contains no JSON array of records")]
    NoArray,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited("slow down".into()).is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(
            ProviderError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );

        assert!(!ProviderError::Auth("bad key".into()).is_transient());
        assert!(
            !ProviderError::Http {
                status: 400,
                body: "bad request".into()
            }
            .is_transient()
        );
        assert!(!ProviderError::InvalidResponse("no choices".into()).is_transient());
        assert!(!ProviderError::Config("no model".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Server {
            status: 502,
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "Server error (HTTP 502): bad gateway");
        assert_eq!(
            ParseResponseError::NoArray.to_string(),
            "reply contains no JSON array of records"
        );
    }
}
