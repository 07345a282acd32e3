//! Argo CD credentials and the places they are read from

use axum::http::HeaderMap;

/// Header carrying the Argo CD base URL on HTTP transports
pub const BASE_URL_HEADER: &str = "x-argocd-base-url";

/// Header carrying the Argo CD API token on HTTP transports
pub const API_TOKEN_HEADER: &str = "x-argocd-api-token";

/// Environment variable holding the Argo CD base URL
pub const BASE_URL_ENV: &str = "ARGOCD_BASE_URL";

/// Environment variable holding the Argo CD API token
pub const API_TOKEN_ENV: &str = "ARGOCD_API_TOKEN";

/// Credentials consumed once when a server instance is created.
///
/// Empty strings are allowed here; whether they are acceptable is decided by
/// the caller (the streamable HTTP router rejects them, stdio and SSE do not).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgocdCredentials {
    pub base_url: String,
    pub api_token: String,
}

impl ArgocdCredentials {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }

    /// Reads `ARGOCD_BASE_URL` / `ARGOCD_API_TOKEN`, defaulting each to an empty string
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var(BASE_URL_ENV).unwrap_or_default(),
            api_token: std::env::var(API_TOKEN_ENV).unwrap_or_default(),
        }
    }

    /// Reads both credential headers, defaulting each to an empty string
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            base_url: header_value(headers, BASE_URL_HEADER).unwrap_or_default(),
            api_token: header_value(headers, API_TOKEN_HEADER).unwrap_or_default(),
        }
    }

    /// Reads both credential headers, taking each missing or empty one from `fallback`
    pub fn from_headers_or(headers: &HeaderMap, fallback: &ArgocdCredentials) -> Self {
        Self {
            base_url: header_value(headers, BASE_URL_HEADER)
                .unwrap_or_else(|| fallback.base_url.clone()),
            api_token: header_value(headers, API_TOKEN_HEADER)
                .unwrap_or_else(|| fallback.api_token.clone()),
        }
    }

    /// True when both values are non-empty
    pub fn is_complete(&self) -> bool {
        !self.base_url.is_empty() && !self.api_token.is_empty()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
