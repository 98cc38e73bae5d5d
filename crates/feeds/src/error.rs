//! Error types for feed operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while fetching or decoding upstream data.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("All endpoints failed for {source_name}: {last}")]
    AllEndpointsFailed { source_name: String, last: String },

    #[error("Malformed field `{field}`: {reason}")]
    MalformedRecord { field: &'static str, reason: String },
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(err.to_string())
        } else if err.is_decode() {
            FeedError::InvalidJson(err.to_string())
        } else if let Some(status) = err.status() {
            FeedError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            FeedError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::InvalidJson(err.to_string())
    }
}

impl From<url::ParseError> for FeedError {
    fn from(err: url::ParseError) -> Self {
        FeedError::InvalidEndpoint(err.to_string())
    }
}

impl FeedError {
    /// True for the "source unavailable this tick" family.
    pub fn is_source_unavailable(&self) -> bool {
        !matches!(self, FeedError::MalformedRecord { .. })
    }

    /// Returns true if this error is transient and likely to succeed on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            FeedError::Http(_) | FeedError::Timeout(_) | FeedError::AllEndpointsFailed { .. } => {
                true
            }
            FeedError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if this error needs a configuration or code change.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FeedError::InvalidEndpoint(_))
    }

    /// Suggested delay before polling the same endpoint again.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FeedError::Status { status: 429, .. } => Some(Duration::from_secs(60)),
            FeedError::Timeout(_) => Some(Duration::from_secs(10)),
            FeedError::Http(_) | FeedError::AllEndpointsFailed { .. } => {
                Some(Duration::from_secs(30))
            }
            FeedError::Status { status, .. } if *status >= 500 => Some(Duration::from_secs(30)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = FeedError::Timeout("10s".into());
        assert!(timeout.is_transient());
        assert!(timeout.is_source_unavailable());

        let malformed = FeedError::MalformedRecord {
            field: "last_price",
            reason: "not a number".into(),
        };
        assert!(!malformed.is_source_unavailable());
        assert!(!malformed.is_transient());

        let not_found = FeedError::Status {
            status: 404,
            url: "https://example.com".into(),
        };
        assert!(!not_found.is_transient());
        assert_eq!(not_found.suggested_retry_delay(), None);

        let bad_url = FeedError::from(url::Url::parse("not a url").unwrap_err());
        assert!(bad_url.is_permanent());
    }
}
