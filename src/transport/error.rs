use crate::types::{SessionId, jsonrpc};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a transport binding
#[derive(Debug, Error)]
pub enum TransportError {
    /// A binding serves exactly one server instance
    #[error("Transport binding is already connected to a server")]
    AlreadyConnected,
}

/// Errors raised by [`SessionRegistry`](super::SessionRegistry) mutations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Only bindings that completed initialization carry a session id
    #[error("Binding has no session id yet")]
    Pending,

    /// Another binding is already registered under this id
    #[error("Session '{0}' is already registered")]
    Occupied(SessionId),
}

/// Per-request rejections produced by the HTTP session routers.
///
/// None of these are fatal and none of them mutate the session registry.
#[derive(Debug, Error)]
pub enum SessionRouteError {
    /// Initialization without resolvable credentials
    #[error("x-argocd-base-url and x-argocd-api-token must be provided in headers.")]
    MissingCredentials,

    /// Session id present but unknown, and no single session to alias
    #[error("Invalid or expired session ID: {session_id}")]
    InvalidSession { session_id: String, request_id: Value },

    /// No session id and the body is not an initialization request
    #[error("Bad Request: Not an initialization request and no valid session ID provided.")]
    NotInitialization { request_id: Value },

    /// GET/DELETE on `/mcp` without a live session id
    #[error("Invalid or missing session ID")]
    MissingSession,

    /// SSE message posted without a `sessionId` query parameter
    #[error("Missing sessionId query parameter")]
    MissingSseSessionId,

    /// SSE message posted to an id that was never issued or already closed
    #[error("No transport found for sessionId: {0}")]
    UnknownSseSession(String),

    /// Request body is not JSON
    #[error("Parse error: {0}")]
    InvalidJson(String),

    /// The new session's binding could not be connected to its server
    #[error("Failed to start session: {0}")]
    Connect(#[from] TransportError),
}

impl SessionRouteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Connect(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// JSON-RPC envelope for variants answered as JSON; `None` for plain-text ones
    pub fn envelope(&self) -> Option<Value> {
        match self {
            Self::InvalidSession { request_id, .. } | Self::NotInitialization { request_id } => {
                Some(jsonrpc::error_envelope(
                    jsonrpc::SERVER_ERROR,
                    self.to_string(),
                    request_id.clone(),
                ))
            }
            Self::InvalidJson(_) => Some(jsonrpc::error_envelope(
                jsonrpc::PARSE_ERROR,
                self.to_string(),
                Value::Null,
            )),
            Self::Connect(_) => Some(jsonrpc::error_envelope(
                jsonrpc::INTERNAL_ERROR,
                self.to_string(),
                Value::Null,
            )),
            Self::MissingCredentials
            | Self::MissingSession
            | Self::MissingSseSessionId
            | Self::UnknownSseSession(_) => None,
        }
    }
}

impl IntoResponse for SessionRouteError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self.envelope() {
            Some(body) => (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body.to_string(),
            )
                .into_response(),
            None => (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                self.to_string(),
            )
                .into_response(),
        }
    }
}
