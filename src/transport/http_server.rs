use crate::server::ServerFactory;
use crate::transport::streamable_http::{StreamableHttpBinding, StreamableHttpOptions};
use crate::transport::{SESSION_ID_HEADER, SessionRegistry, SessionRouteError, TransportBinding};
use crate::types::{ArgocdCredentials, SessionId, jsonrpc};
use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Path of the streamable HTTP endpoint
pub const MCP_PATH: &str = "/mcp";

/// Session id supplied by the client, if any (an empty header counts as absent)
pub fn session_id_header(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(SessionId::from)
}

/// Decides, per request on `/mcp`, which streamable HTTP binding handles it.
///
/// POST routing order:
/// 1. `ping` is answered directly, with no session lookup.
/// 2. A known session id goes to its binding.
/// 3. An unknown id while exactly one session is live re-keys that session
///    to the new id (reconnect after a client lost its id).
/// 4. An initialization request without an id opens a new session.
/// 5. Anything else is rejected with a `-32000` envelope.
pub struct SessionRouter<F> {
    factory: F,
    registry: Arc<SessionRegistry<StreamableHttpBinding>>,
    fallback_credentials: ArgocdCredentials,
}

impl<F: ServerFactory> SessionRouter<F> {
    /// Creates a router with an empty registry.
    ///
    /// `fallback_credentials` fills in per field whatever the initialization
    /// request headers leave out.
    pub fn new(factory: F, fallback_credentials: ArgocdCredentials) -> Self {
        Self {
            factory,
            registry: Arc::new(SessionRegistry::new()),
            fallback_credentials,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<StreamableHttpBinding>> {
        &self.registry
    }

    /// Handles one POST body already decoded as JSON
    pub async fn handle_post(&self, headers: &HeaderMap, body: Value) -> Response {
        if jsonrpc::is_ping(&body) {
            return Json(jsonrpc::ping_envelope(jsonrpc::request_id(&body))).into_response();
        }

        match self.resolve(headers, &body) {
            Ok(binding) => {
                binding
                    .handle_request(&Method::POST, headers, Some(body))
                    .await
            }
            Err(e) => e.into_response(),
        }
    }

    /// Handles GET and DELETE, which only ever reach an existing session
    pub async fn handle_session_request(&self, method: Method, headers: &HeaderMap) -> Response {
        match session_id_header(headers).and_then(|id| self.registry.get(&id)) {
            Some(binding) => binding.handle_request(&method, headers, None).await,
            None => SessionRouteError::MissingSession.into_response(),
        }
    }

    /// Picks the binding for a non-ping POST, creating one for initialization
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        body: &Value,
    ) -> Result<Arc<StreamableHttpBinding>, SessionRouteError> {
        if let Some(provided) = session_id_header(headers) {
            if let Some(binding) = self.registry.get(&provided) {
                return Ok(binding);
            }

            if let Some((previous, binding)) = self.registry.alias_sole_session(&provided) {
                warn!(
                    provided_session_id = %provided,
                    only_session_id = %previous,
                    "Aliasing unknown MCP session ID to existing single session"
                );
                return Ok(binding);
            }

            return Err(SessionRouteError::InvalidSession {
                session_id: provided.to_string(),
                request_id: jsonrpc::request_id(body),
            });
        }

        if jsonrpc::is_initialize_request(body) {
            return self.open_session(headers);
        }

        Err(SessionRouteError::NotInitialization {
            request_id: jsonrpc::request_id(body),
        })
    }

    fn open_session(
        &self,
        headers: &HeaderMap,
    ) -> Result<Arc<StreamableHttpBinding>, SessionRouteError> {
        let credentials = ArgocdCredentials::from_headers_or(headers, &self.fallback_credentials);
        if !credentials.is_complete() {
            return Err(SessionRouteError::MissingCredentials);
        }

        let registry = Arc::clone(&self.registry);
        let binding = StreamableHttpBinding::new(StreamableHttpOptions {
            session_id_generator: Box::new(SessionId::random),
            on_session_initialized: Some(Box::new(
                move |session_id: &SessionId, binding: Arc<StreamableHttpBinding>| {
                    match registry.insert(binding) {
                        Ok(_) => info!(session_id = %session_id, "MCP session initialized"),
                        Err(e) => error!(error = %e, "Failed to register MCP session"),
                    }
                },
            )),
        });

        let registry = Arc::clone(&self.registry);
        let weak = Arc::downgrade(&binding);
        binding.on_close(Box::new(move |_session_id: Option<&SessionId>| {
            registry.remove_binding(weak.as_ptr());
        }));

        let server = self.factory.create_server(credentials);
        if let Err(e) = Arc::clone(&binding).connect(server) {
            binding.close();
            return Err(e.into());
        }
        Ok(binding)
    }
}

/// Routes `POST`, `GET` and `DELETE /mcp`
pub fn streamable_http_router<F: ServerFactory>(router: Arc<SessionRouter<F>>) -> Router {
    Router::new()
        .route(
            MCP_PATH,
            post(handle_mcp_post::<F>)
                .get(handle_mcp_session::<F>)
                .delete(handle_mcp_session::<F>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(router)
}

async fn handle_mcp_post<F: ServerFactory>(
    State(router): State<Arc<SessionRouter<F>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => return SessionRouteError::InvalidJson(e.to_string()).into_response(),
    };
    router.handle_post(&headers, body).await
}

async fn handle_mcp_session<F: ServerFactory>(
    State(router): State<Arc<SessionRouter<F>>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    router.handle_session_request(method, &headers).await
}

pub struct HttpServerApp<F> {
    bind_addr: SocketAddr,
    factory: F,
    fallback_credentials: ArgocdCredentials,
}

impl<F: ServerFactory> HttpServerApp<F> {
    /// Creates a new streamable HTTP server application instance.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - The socket address to bind the server to
    /// * `factory` - Builds one server instance per initialized session
    /// * `fallback_credentials` - Used where initialization headers omit a credential
    pub fn new(
        bind_addr: SocketAddr,
        factory: F,
        fallback_credentials: ArgocdCredentials,
    ) -> Self {
        Self {
            bind_addr,
            factory,
            fallback_credentials,
        }
    }

    /// Starts the streamable HTTP server on `/mcp`.
    ///
    /// This method starts the server and waits for a Ctrl+C signal to shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The server fails to bind to the specified address
    /// - The server encounters an error during operation
    pub async fn serve(self) -> Result<()> {
        let router = Arc::new(SessionRouter::new(self.factory, self.fallback_credentials));
        let app = streamable_http_router(router);
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        info!("Connecting to stream HTTP transport on {}", self.bind_addr);

        tokio::select! {
            result = axum::serve(listener, app).into_future() => result?,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutting down streamable HTTP server");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn router() -> SessionRouter<impl ServerFactory> {
        SessionRouter::new(crate::server::create_server, ArgocdCredentials::default())
    }

    #[test]
    fn test_empty_session_header_counts_as_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id_header(&headers), None);
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(session_id_header(&headers), None);
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_id_header(&headers), Some(SessionId::from("abc")));
    }

    #[test]
    fn test_unknown_session_without_sessions_is_rejected() {
        let router = router();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("ghost"));

        let result = router.resolve(
            &headers,
            &json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"}),
        );
        match result {
            Err(SessionRouteError::InvalidSession {
                session_id,
                request_id,
            }) => {
                assert_eq!(session_id, "ghost");
                assert_eq!(request_id, json!(9));
            }
            other => panic!("unexpected routing result: {:?}", other.map(|_| ())),
        }
        assert!(router.registry().is_empty());
    }

    #[test]
    fn test_initialize_without_credentials_is_rejected() {
        let router = router();
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }
        });
        assert!(matches!(
            router.resolve(&HeaderMap::new(), &body),
            Err(SessionRouteError::MissingCredentials)
        ));
        assert!(router.registry().is_empty());
    }

    #[test]
    fn test_non_initialization_without_session_is_rejected() {
        let router = router();
        let result = router.resolve(
            &HeaderMap::new(),
            &json!({"jsonrpc": "2.0", "id": "x", "method": "tools/list"}),
        );
        assert!(matches!(
            result,
            Err(SessionRouteError::NotInitialization { request_id }) if request_id == json!("x")
        ));
    }
}
