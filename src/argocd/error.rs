use thiserror::Error;

/// Errors returned by [`ArgocdClient`](super::ArgocdClient)
#[derive(Debug, Error)]
pub enum ArgocdError {
    /// Base URL missing or not parseable
    #[error("Invalid Argo CD base URL '{0}'")]
    InvalidBaseUrl(String),

    /// API token missing
    #[error("Argo CD API token is empty")]
    MissingToken,

    /// Transport-level failure (connect, TLS, timeout)
    #[error("Argo CD request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Argo CD answered with a non-success status
    #[error("Argo CD API error - Status: {status}, Body: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON
    #[error("Failed to decode Argo CD response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ArgocdError {
    /// Whether repeating the same request may succeed.
    ///
    /// Server errors (5xx) and transport failures are retryable; client
    /// errors (4xx), configuration and decode errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => (500..=599).contains(status),
            Self::InvalidBaseUrl(_) | Self::MissingToken | Self::Decode(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let server_error = ArgocdError::Status {
            status: 503,
            body: String::new(),
        };
        let not_found = ArgocdError::Status {
            status: 404,
            body: "app not found".to_string(),
        };
        assert!(server_error.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(!ArgocdError::MissingToken.is_retryable());
        assert!(!ArgocdError::InvalidBaseUrl("x".to_string()).is_retryable());
    }
}
