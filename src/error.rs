//! Error types for the Kite client library.

use reqwest::StatusCode;
use thiserror::Error;

/// The main error type for all Kite client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The session token is missing, expired or was rejected by the server.
    ///
    /// Not retried. A fresh login is required.
    #[error("Session expired or invalid, must log in again")]
    SessionExpired,

    /// The server rejected the request parameters (4xx other than 401/403/429).
    #[error("Bad request ({status}): {message}")]
    BadRequest {
        /// HTTP status returned by the server
        status: StatusCode,
        /// Provider message, or the canonical reason
        message: String,
    },

    /// The server failed to process the request (5xx).
    #[error("Server error ({status}): {message}")]
    ServerError {
        /// HTTP status returned by the server
        status: StatusCode,
        /// Provider message, or the canonical reason
        message: String,
    },

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// The connection could not be established or was reset.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Too many rate limit rejections were observed in this session.
    ///
    /// The client refuses to send further requests.
    #[error("Rate limit penalties exhausted after {penalties} rejections")]
    ExhaustedRetries {
        /// Number of rejections recorded when the breaker tripped
        penalties: u32,
    },

    /// A wait was interrupted by the caller's cancellation signal or deadline.
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request with middleware failed
    #[error("HTTP request failed: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Session file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Login or token exchange failed
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid throttle or client configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Caller-supplied arguments were rejected before sending
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid response from the API
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Whether the caller may reasonably retry the same request later.
    ///
    /// Server errors and transport failures are transient but are never
    /// retried by the executor itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ServerError { .. } | ClientError::Timeout | ClientError::NetworkError(_)
        )
    }

    /// Whether the session can no longer be used for any request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::ExhaustedRetries { .. })
    }

    /// Whether a new login is required before retrying.
    pub fn requires_login(&self) -> bool {
        matches!(self, ClientError::SessionExpired)
    }
}

/// Error body returned by the Kite API for non-2xx responses.
///
/// ```json
/// {"status": "error", "message": "Invalid `api_key` or `access_token`.", "error_type": "TokenException"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ApiError {
    /// Always `"error"` for failures
    #[serde(default)]
    pub status: String,
    /// Human-readable error message
    #[serde(default)]
    pub message: String,
    /// Exception class name (e.g. `TokenException`, `InputException`)
    #[serde(default)]
    pub error_type: Option<String>,
}

impl ApiError {
    /// Parse an error body, returning `None` when it is not the provider's JSON shape.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    /// Check if this is a token/session error.
    pub fn is_token_exception(&self) -> bool {
        self.error_type.as_deref() == Some(error_types::TOKEN)
    }
}

/// Known Kite exception types.
pub mod error_types {
    /// Session expired or invalidated
    pub const TOKEN: &str = "TokenException";
    /// Access to the resource is not permitted for this user
    pub const PERMISSION: &str = "PermissionException";
    /// Missing or bad request parameters
    pub const INPUT: &str = "InputException";
    /// Order placement or modification failure
    pub const ORDER: &str = "OrderException";
    /// Too many requests
    pub const NETWORK: &str = "NetworkException";
    /// Upstream OMS failure
    pub const GENERAL: &str = "GeneralException";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_from_body() {
        let body = br#"{"status":"error","message":"Invalid token","error_type":"TokenException"}"#;
        let error = ApiError::from_body(body).unwrap();
        assert_eq!(error.message, "Invalid token");
        assert!(error.is_token_exception());
    }

    #[test]
    fn test_api_error_from_non_json_body() {
        assert!(ApiError::from_body(b"<html>Bad Gateway</html>").is_none());
    }

    #[test]
    fn test_error_classes() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::NetworkError("reset".into()).is_retryable());
        assert!(!ClientError::SessionExpired.is_retryable());
        assert!(ClientError::SessionExpired.requires_login());
        assert!(ClientError::ExhaustedRetries { penalties: 16 }.is_fatal());
        assert!(!ClientError::Cancelled.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let error = ClientError::BadRequest {
            status: StatusCode::BAD_REQUEST,
            message: "Missing instrument".into(),
        };
        assert_eq!(error.to_string(), "Bad request (400 Bad Request): Missing instrument");
    }
}
