use std::time::Duration;
use thiserror::Error;

/// Errors raised by a single request against the category backend.
///
/// `Timeout`, `Network` and `ResponseTooLarge` are transport failures;
/// `HttpRejection` means the server answered with a non-2xx status.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request exceeded the configured timeout
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {status}{}", body_suffix(.body))]
    HttpRejection { status: u16, body: String },
    /// Response body could not be decoded as the expected JSON shape
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

fn body_suffix(body: &str) -> String {
    if body.trim().is_empty() {
        String::new()
    } else {
        format!(" - {}", body.trim())
    }
}

impl ApiError {
    /// Returns true for failures where no HTTP status was received.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ApiError::Timeout(_) | ApiError::Network(_) | ApiError::ResponseTooLarge
        )
    }

    /// The rejected status code, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::HttpRejection { status, .. } => Some(*status),
            _ => None,
        }
    }
}
