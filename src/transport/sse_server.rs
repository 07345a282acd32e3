use crate::server::ServerFactory;
use crate::transport::channel::{
    ChannelTransport, ClientMessage, OutboundSink, ServerMessage, channel_transport,
    parse_client_message, spawn_outbound_pump, spawn_service,
};
use crate::transport::{
    CloseHook, Lifecycle, SessionBinding, SessionRegistry, SessionRouteError, TransportBinding,
    TransportError, lock,
};
use crate::types::{ArgocdCredentials, SessionId};
use anyhow::Result;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use rmcp::ServerHandler;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// Path of the event-stream endpoint
pub const SSE_PATH: &str = "/sse";

/// Path clients post messages to, with `?sessionId=<id>`
pub const MESSAGES_PATH: &str = "/messages";

/// Legacy SSE binding: one event stream per session, messages posted separately.
///
/// The session id is generated at construction and never changes.
pub struct SseBinding {
    session_id: SessionId,
    transport: Mutex<Option<(ChannelTransport, mpsc::UnboundedReceiver<ServerMessage>)>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    events: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    lifecycle: Lifecycle,
}

impl SseBinding {
    /// Creates a binding with a fresh session id and the receiver of its event stream
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        let (transport, ends) = channel_transport();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let binding = Arc::new(Self {
            session_id: SessionId::random(),
            transport: Mutex::new(Some((transport, ends.outbound))),
            inbound: Mutex::new(Some(ends.inbound)),
            events: Mutex::new(Some(events_tx)),
            lifecycle: Lifecycle::new(),
        });
        (binding, events_rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.session_id
    }

    /// Forwards one posted client message to the server
    pub fn handle_post_message(&self, body: &[u8]) -> Response {
        let message = match serde_json::from_slice::<Value>(body)
            .and_then(parse_client_message)
        {
            Ok(message) => message,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("Invalid message: {}", e))
                    .into_response();
            }
        };

        let sent = lock(&self.inbound)
            .as_ref()
            .is_some_and(|inbound| inbound.send(message).is_ok());
        if !sent {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SSE connection not established",
            )
                .into_response();
        }
        (StatusCode::ACCEPTED, "Accepted").into_response()
    }
}

impl SessionBinding for SseBinding {
    fn session_id(&self) -> Option<SessionId> {
        Some(self.session_id.clone())
    }
}

impl TransportBinding for SseBinding {
    fn connect<S: ServerHandler>(self: Arc<Self>, server: S) -> Result<(), TransportError> {
        let (transport, outbound) = lock(&self.transport)
            .take()
            .ok_or(TransportError::AlreadyConnected)?;
        spawn_service(server, transport);
        spawn_outbound_pump(Arc::downgrade(&self), outbound);
        Ok(())
    }

    fn on_close(&self, hook: CloseHook) {
        self.lifecycle.add_hook(hook, Some(&self.session_id));
    }

    fn close(&self) {
        lock(&self.inbound).take();
        lock(&self.events).take();
        if self.lifecycle.close(Some(&self.session_id)) {
            tracing::info!(session_id = %self.session_id, "SSE session closed");
        }
    }
}

impl OutboundSink for SseBinding {
    fn deliver(&self, message: Value) {
        if let Some(events) = lock(&self.events).as_ref() {
            let _ = events.send(message);
        }
    }
}

/// Closes the binding when the event stream is dropped (client disconnect)
struct CloseOnDrop(Arc<SseBinding>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Shared state of the SSE routes
pub struct SseState<F> {
    factory: Arc<F>,
    registry: Arc<SessionRegistry<SseBinding>>,
}

impl<F> Clone for SseState<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<F: ServerFactory> SseState<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry<SseBinding>> {
        &self.registry
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Routes `GET /sse` and `POST /messages`
pub fn sse_router<F: ServerFactory>(state: SseState<F>) -> Router {
    Router::new()
        .route(SSE_PATH, get(handle_sse_connect::<F>))
        .route(MESSAGES_PATH, post(handle_post_message::<F>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_sse_connect<F: ServerFactory>(
    State(state): State<SseState<F>>,
    headers: HeaderMap,
) -> Response {
    let server = state
        .factory
        .create_server(ArgocdCredentials::from_headers(&headers));
    let (binding, mut events) = SseBinding::new();
    let session_id = binding.id().clone();

    if let Err(e) = state.registry.insert(Arc::clone(&binding)) {
        tracing::error!(error = %e, "Failed to register SSE session");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    let registry = Arc::clone(&state.registry);
    let weak = Arc::downgrade(&binding);
    binding.on_close(Box::new(move |_session_id: Option<&SessionId>| {
        registry.remove_binding(weak.as_ptr());
    }));

    if let Err(e) = Arc::clone(&binding).connect(server) {
        binding.close();
        return SessionRouteError::from(e).into_response();
    }
    tracing::info!(session_id = %session_id, "SSE session opened");

    let endpoint = format!("{}?sessionId={}", MESSAGES_PATH, session_id);
    let guard = CloseOnDrop(binding);
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));
        while let Some(message) = events.recv().await {
            yield Ok(Event::default().event("message").data(message.to_string()));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_post_message<F: ServerFactory>(
    State(state): State<SseState<F>>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return SessionRouteError::MissingSseSessionId.into_response();
    };
    match state.registry.get(&SessionId::from(session_id.as_str())) {
        Some(binding) => binding.handle_post_message(&body),
        None => SessionRouteError::UnknownSseSession(session_id).into_response(),
    }
}

pub struct SseServerApp<F> {
    bind_addr: SocketAddr,
    factory: F,
}

impl<F: ServerFactory> SseServerApp<F> {
    /// Creates a new SSE server application instance.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - The socket address to bind the server to
    /// * `factory` - Builds one server instance per SSE connection from its request headers
    pub fn new(bind_addr: SocketAddr, factory: F) -> Self {
        Self { bind_addr, factory }
    }

    /// Starts the SSE server and serves one session per `GET /sse` connection.
    ///
    /// This method starts the server and waits for a Ctrl+C signal to shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The server fails to bind to the specified address
    /// - The server encounters an error during operation
    pub async fn serve(self) -> Result<()> {
        let app = sse_router(SseState::new(self.factory));
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        tracing::info!("Connecting to SSE transport on {}", self.bind_addr);

        tokio::select! {
            result = axum::serve(listener, app).into_future() => result?,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutting down SSE server");
            }
        }

        Ok(())
    }
}
