//! Error types for Octavia API operations.
//!
//! HTTP failures are mapped onto a small set of variants so callers can tell
//! a missing resource from a busy load balancer from a broken transport.

use thiserror::Error;

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by the control-plane client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP request could not be sent or the response body not read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Octavia API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Fault string returned by Octavia, or the raw body.
        message: String,
    },

    /// The requested resource does not exist (HTTP 404).
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Resource kind (e.g., "pool", "listener").
        resource: String,
        /// Resource identifier.
        id: String,
    },

    /// The request conflicts with the current state (HTTP 409).
    ///
    /// Octavia returns this while a previous change is still being applied,
    /// among other cases. The fault string is shown as-is.
    #[error("{message}")]
    Conflict {
        /// Fault string returned by Octavia.
        message: String,
    },

    /// Keystone authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Client configuration is incomplete or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A response body did not have the expected shape.
    #[error("failed to parse API response: {0}")]
    Parse(String),
}

impl ApiError {
    /// Creates a not-found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a generic API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// Returns true if the load balancer rejected the call because it is busy.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = ApiError::not_found("pool", "p-1");
        assert_eq!(err.to_string(), "pool 'p-1' not found");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_conflict_display() {
        let err = ApiError::conflict("Load Balancer lb-1 is immutable");
        assert_eq!(err.to_string(), "Load Balancer lb-1 is immutable");
        assert!(err.is_conflict());

        let err = ApiError::conflict("Pool old is the default pool of listener li-2");
        assert_eq!(err.to_string(), "Pool old is the default pool of listener li-2");
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::api(500, "internal");
        assert_eq!(err.to_string(), "Octavia API error: 500 - internal");
    }
}
