use crate::transport::channel::{
    ChannelTransport, ClientMessage, OutboundSink, ServerMessage, channel_transport,
    parse_client_message, spawn_outbound_pump, spawn_service,
};
use crate::transport::{
    AliasableBinding, CloseHook, Lifecycle, SESSION_ID_HEADER, SessionBinding, TransportBinding,
    TransportError, lock, read, write,
};
use crate::types::{SessionId, jsonrpc};
use axum::Json;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use rmcp::ServerHandler;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Produces the id assigned when a pending binding completes initialization
pub type SessionIdGenerator = Box<dyn Fn() -> SessionId + Send + Sync>;

/// Fired once, when the binding transitions from pending to bound
pub type SessionInitializedHook = Box<dyn FnOnce(&SessionId, Arc<StreamableHttpBinding>) + Send>;

pub struct StreamableHttpOptions {
    pub session_id_generator: SessionIdGenerator,
    pub on_session_initialized: Option<SessionInitializedHook>,
}

impl Default for StreamableHttpOptions {
    fn default() -> Self {
        Self {
            session_id_generator: Box::new(SessionId::random),
            on_session_initialized: None,
        }
    }
}

/// Session id state of a streamable HTTP binding.
///
/// A binding starts `Pending`; handling the initialization request moves it
/// to `Bound`. Only bound bindings carry an id and can be registered. The id
/// of a bound binding may later be rewritten by session aliasing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BindingState {
    Pending,
    Bound(SessionId),
}

/// Streamable HTTP binding: one server instance behind a single HTTP endpoint.
pub struct StreamableHttpBinding {
    state: RwLock<BindingState>,
    session_id_generator: SessionIdGenerator,
    on_session_initialized: Mutex<Option<SessionInitializedHook>>,
    transport: Mutex<Option<(ChannelTransport, mpsc::UnboundedReceiver<ServerMessage>)>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    standalone: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    lifecycle: Lifecycle,
}

impl StreamableHttpBinding {
    pub fn new(options: StreamableHttpOptions) -> Arc<Self> {
        let (transport, ends) = channel_transport();
        Arc::new(Self {
            state: RwLock::new(BindingState::Pending),
            session_id_generator: options.session_id_generator,
            on_session_initialized: Mutex::new(options.on_session_initialized),
            transport: Mutex::new(Some((transport, ends.outbound))),
            inbound: Mutex::new(Some(ends.inbound)),
            pending: Mutex::new(HashMap::new()),
            standalone: Mutex::new(None),
            lifecycle: Lifecycle::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Processes one HTTP request for this session and writes the response.
    ///
    /// POST carries JSON-RPC messages, GET opens the standalone event stream,
    /// DELETE terminates the session.
    pub async fn handle_request(
        self: Arc<Self>,
        method: &Method,
        headers: &HeaderMap,
        body: Option<Value>,
    ) -> Response {
        match *method {
            Method::POST => self.handle_post(headers, body).await,
            Method::GET => self.handle_get(headers),
            Method::DELETE => self.handle_delete(headers),
            _ => (
                StatusCode::METHOD_NOT_ALLOWED,
                [(header::ALLOW, "GET, POST, DELETE")],
                Json(jsonrpc::error_envelope(
                    jsonrpc::SERVER_ERROR,
                    "Method not allowed.",
                    Value::Null,
                )),
            )
                .into_response(),
        }
    }

    async fn handle_post(self: Arc<Self>, headers: &HeaderMap, body: Option<Value>) -> Response {
        let Some(body) = body else {
            return rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::PARSE_ERROR,
                "Parse error: empty body",
            );
        };
        let is_batch = body.is_array();
        let messages = match body {
            Value::Array(items) => items,
            single => vec![single],
        };
        if messages.is_empty() {
            return rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::INVALID_REQUEST,
                "Invalid Request: empty batch",
            );
        }

        // Everything is decoded before the session state can change
        let mut has_initialize = false;
        let mut request_ids = Vec::new();
        let mut decoded = Vec::with_capacity(messages.len());
        for message in messages {
            has_initialize |= jsonrpc::is_initialize_request(&message);
            if jsonrpc::is_request(&message) {
                request_ids.push(jsonrpc::request_id(&message));
            }
            match parse_client_message(message) {
                Ok(message) => decoded.push(message),
                Err(e) => {
                    self.close_if_pending();
                    return rejection(
                        StatusCode::BAD_REQUEST,
                        jsonrpc::PARSE_ERROR,
                        format!("Parse error: {}", e),
                    );
                }
            }
        }

        let mut seen = HashSet::new();
        if !request_ids.iter().all(|id| seen.insert(jsonrpc::id_key(id))) {
            self.close_if_pending();
            return rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::INVALID_REQUEST,
                "Invalid Request: duplicate request id in batch",
            );
        }

        let validation = if has_initialize {
            Self::initialize(&self, decoded.len())
        } else {
            self.validate_session(headers)
        };
        if let Err(response) = validation {
            self.close_if_pending();
            return response;
        }

        let Some(waiters) = self.register_waiters(request_ids) else {
            return rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::INVALID_REQUEST,
                "Invalid Request: request id is already in flight",
            );
        };

        if !self.forward(decoded) {
            let mut pending = lock(&self.pending);
            for (id, _) in &waiters {
                pending.remove(&jsonrpc::id_key(id));
            }
            return rejection(
                StatusCode::NOT_FOUND,
                jsonrpc::SESSION_NOT_FOUND,
                "Session not found",
            );
        }

        if waiters.is_empty() {
            return self.with_session_header(StatusCode::ACCEPTED.into_response());
        }

        let mut responses = Vec::with_capacity(waiters.len());
        for (id, waiter) in waiters {
            let response = waiter.await.unwrap_or_else(|_| {
                jsonrpc::error_envelope(
                    jsonrpc::INTERNAL_ERROR,
                    "Session closed before a response was sent",
                    id,
                )
            });
            responses.push(response);
        }

        let body = if is_batch {
            Value::Array(responses)
        } else {
            responses.into_iter().next().unwrap_or(Value::Null)
        };
        self.with_session_header((StatusCode::OK, Json(body)).into_response())
    }

    fn handle_get(self: Arc<Self>, headers: &HeaderMap) -> Response {
        if let Err(response) = self.validate_session(headers) {
            return response;
        }

        let accepts_event_stream = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/event-stream"));
        if !accepts_event_stream {
            return rejection(
                StatusCode::NOT_ACCEPTABLE,
                jsonrpc::SERVER_ERROR,
                "Not Acceptable: Client must accept text/event-stream",
            );
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        {
            let mut standalone = lock(&self.standalone);
            if standalone.as_ref().is_some_and(|open| !open.is_closed()) {
                return rejection(
                    StatusCode::CONFLICT,
                    jsonrpc::SERVER_ERROR,
                    "Conflict: Only one SSE stream is allowed per session",
                );
            }
            *standalone = Some(tx);
        }

        let stream = async_stream::stream! {
            while let Some(message) = rx.recv().await {
                yield Ok::<Event, Infallible>(Event::default().event("message").data(message.to_string()));
            }
        };
        self.with_session_header(
            Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response(),
        )
    }

    fn handle_delete(self: Arc<Self>, headers: &HeaderMap) -> Response {
        if let Err(response) = self.validate_session(headers) {
            return response;
        }
        self.close();
        StatusCode::OK.into_response()
    }

    /// Pending -> bound transition, run while handling the initialization request
    fn initialize(binding: &Arc<Self>, message_count: usize) -> Result<(), Response> {
        if message_count > 1 {
            return Err(rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::INVALID_REQUEST,
                "Invalid Request: Only one initialization request is allowed",
            ));
        }

        let session_id = {
            let mut state = write(&binding.state);
            if *state != BindingState::Pending {
                return Err(rejection(
                    StatusCode::BAD_REQUEST,
                    jsonrpc::INVALID_REQUEST,
                    "Invalid Request: Server already initialized",
                ));
            }
            let session_id = (binding.session_id_generator)();
            *state = BindingState::Bound(session_id.clone());
            session_id
        };

        let hook = lock(&binding.on_session_initialized).take();
        if let Some(hook) = hook {
            hook(&session_id, Arc::clone(binding));
        }
        Ok(())
    }

    fn validate_session(&self, headers: &HeaderMap) -> Result<(), Response> {
        let Some(current) = self.session_id() else {
            return Err(rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::SERVER_ERROR,
                "Bad Request: Server not initialized",
            ));
        };
        match headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok()) {
            None => Err(rejection(
                StatusCode::BAD_REQUEST,
                jsonrpc::SERVER_ERROR,
                "Bad Request: Mcp-Session-Id header is required",
            )),
            Some(provided) if current != provided => Err(rejection(
                StatusCode::NOT_FOUND,
                jsonrpc::SESSION_NOT_FOUND,
                "Session not found",
            )),
            Some(_) => Ok(()),
        }
    }

    /// Registers one response waiter per request id.
    ///
    /// Registration happens before forwarding so no response can be missed.
    /// Returns `None`, registering nothing, when an id is already awaited.
    fn register_waiters(
        &self,
        request_ids: Vec<Value>,
    ) -> Option<Vec<(Value, oneshot::Receiver<Value>)>> {
        let mut pending = lock(&self.pending);
        if request_ids
            .iter()
            .any(|id| pending.contains_key(&jsonrpc::id_key(id)))
        {
            return None;
        }
        let waiters = request_ids
            .into_iter()
            .map(|id| {
                let (tx, rx) = oneshot::channel();
                pending.insert(jsonrpc::id_key(&id), tx);
                (id, rx)
            })
            .collect();
        Some(waiters)
    }

    /// A binding rejected before initialization is never registered; close it
    fn close_if_pending(&self) {
        if self.session_id().is_none() {
            self.close();
        }
    }

    /// Hands client messages to the server; false once the binding is closed
    fn forward(&self, messages: Vec<ClientMessage>) -> bool {
        let inbound = lock(&self.inbound);
        let Some(inbound) = inbound.as_ref() else {
            return false;
        };
        messages
            .into_iter()
            .all(|message| inbound.send(message).is_ok())
    }

    fn with_session_header(&self, mut response: Response) -> Response {
        if let Some(session_id) = self.session_id() {
            if let Ok(value) = HeaderValue::from_str(session_id.as_str()) {
                response.headers_mut().insert(SESSION_ID_HEADER, value);
            }
        }
        response
    }
}

fn rejection(status: StatusCode, code: i64, message: impl Into<String>) -> Response {
    (
        status,
        Json(jsonrpc::error_envelope(code, message, Value::Null)),
    )
        .into_response()
}

impl SessionBinding for StreamableHttpBinding {
    fn session_id(&self) -> Option<SessionId> {
        match &*read(&self.state) {
            BindingState::Pending => None,
            BindingState::Bound(session_id) => Some(session_id.clone()),
        }
    }
}

impl AliasableBinding for StreamableHttpBinding {
    fn rebind_session_id(&self, session_id: SessionId) {
        *write(&self.state) = BindingState::Bound(session_id);
    }
}

impl TransportBinding for StreamableHttpBinding {
    fn connect<S: ServerHandler>(self: Arc<Self>, server: S) -> Result<(), TransportError> {
        let (transport, outbound) = lock(&self.transport)
            .take()
            .ok_or(TransportError::AlreadyConnected)?;
        spawn_service(server, transport);
        spawn_outbound_pump(Arc::downgrade(&self), outbound);
        Ok(())
    }

    fn on_close(&self, hook: CloseHook) {
        self.lifecycle.add_hook(hook, self.session_id().as_ref());
    }

    fn close(&self) {
        lock(&self.inbound).take();
        lock(&self.pending).clear();
        lock(&self.standalone).take();
        let session_id = self.session_id();
        if self.lifecycle.close(session_id.as_ref()) {
            info!(session_id = ?session_id, "Streamable HTTP session closed");
        }
    }
}

impl OutboundSink for StreamableHttpBinding {
    fn deliver(&self, message: Value) {
        if jsonrpc::is_response(&message) {
            let key = jsonrpc::id_key(&message["id"]);
            let waiter = lock(&self.pending).remove(&key);
            if let Some(waiter) = waiter {
                let _ = waiter.send(message);
                return;
            }
        }

        let standalone = lock(&self.standalone);
        let delivered = standalone
            .as_ref()
            .is_some_and(|stream| stream.send(message).is_ok());
        if !delivered {
            debug!("No open stream for server message; dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn initialize_body() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }
        })
    }

    fn fixed_id_options(id: &'static str) -> StreamableHttpOptions {
        StreamableHttpOptions {
            session_id_generator: Box::new(move || SessionId::from(id)),
            on_session_initialized: None,
        }
    }

    fn session_headers(session_id: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static(session_id));
        headers
    }

    async fn error_code(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        body["error"]["code"].clone()
    }

    #[tokio::test]
    async fn test_undecodable_initialize_closes_pending_binding() {
        let (tx, rx) = std::sync::mpsc::channel::<SessionId>();
        let binding = StreamableHttpBinding::new(StreamableHttpOptions {
            session_id_generator: Box::new(|| SessionId::from("never")),
            on_session_initialized: Some(Box::new(
                move |session_id: &SessionId, _bound: Arc<StreamableHttpBinding>| {
                    let _ = tx.send(session_id.clone());
                },
            )),
        });

        let mut body = initialize_body();
        body["params"]["capabilities"] = json!({"roots": 5});
        let response = Arc::clone(&binding)
            .handle_request(&Method::POST, &HeaderMap::new(), Some(body))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, json!(jsonrpc::PARSE_ERROR));
        assert_eq!(binding.session_id(), None);
        assert!(binding.is_closed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_batch_are_rejected() {
        let binding = StreamableHttpBinding::new(fixed_id_options("abc"));
        assert!(StreamableHttpBinding::initialize(&binding, 1).is_ok());

        let batch = json!([
            {"jsonrpc": "2.0", "id": 3, "method": "tools/list"},
            {"jsonrpc": "2.0", "id": 3, "method": "tools/list"}
        ]);
        let response = Arc::clone(&binding)
            .handle_request(&Method::POST, &session_headers("abc"), Some(batch))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, json!(jsonrpc::INVALID_REQUEST));
        assert!(lock(&binding.pending).is_empty());
        assert!(!binding.is_closed());
    }

    #[tokio::test]
    async fn test_request_id_in_flight_is_rejected() {
        let binding = StreamableHttpBinding::new(fixed_id_options("abc"));
        assert!(StreamableHttpBinding::initialize(&binding, 1).is_ok());
        let (tx, mut rx) = oneshot::channel();
        lock(&binding.pending).insert(jsonrpc::id_key(&json!(5)), tx);

        let response = Arc::clone(&binding)
            .handle_request(
                &Method::POST,
                &session_headers("abc"),
                Some(json!({"jsonrpc": "2.0", "id": 5, "method": "tools/list"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, json!(jsonrpc::INVALID_REQUEST));

        // The first waiter still receives its response
        binding.deliver(json!({"jsonrpc": "2.0", "id": 5, "result": {}}));
        assert_eq!(rx.try_recv().unwrap()["id"], json!(5));
    }

    #[tokio::test]
    async fn test_pending_binding_rejects_non_initialization() {
        let binding = StreamableHttpBinding::new(StreamableHttpOptions::default());
        let response = binding
            .handle_request(
                &Method::POST,
                &HeaderMap::new(),
                Some(json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_initialize_binds_and_fires_hook_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let binding = StreamableHttpBinding::new(StreamableHttpOptions {
            session_id_generator: Box::new(|| SessionId::from("generated")),
            on_session_initialized: Some(Box::new(
                move |session_id: &SessionId, bound: Arc<StreamableHttpBinding>| {
                    let _ = tx.send((session_id.clone(), bound.session_id()));
                },
            )),
        });
        assert_eq!(binding.session_id(), None);

        assert!(StreamableHttpBinding::initialize(&binding, 1).is_ok());
        assert_eq!(binding.session_id(), Some(SessionId::from("generated")));
        assert_eq!(
            rx.recv().unwrap(),
            (
                SessionId::from("generated"),
                Some(SessionId::from("generated"))
            )
        );

        let second = StreamableHttpBinding::initialize(&binding, 1);
        assert_eq!(second.unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_initialize_must_be_alone() {
        let binding = StreamableHttpBinding::new(fixed_id_options("a"));
        let result = StreamableHttpBinding::initialize(&binding, 2);
        assert_eq!(result.unwrap_err().status(), StatusCode::BAD_REQUEST);
        assert_eq!(binding.session_id(), None);
    }

    #[test]
    fn test_session_header_validation() {
        let binding = StreamableHttpBinding::new(fixed_id_options("abc"));
        assert!(StreamableHttpBinding::initialize(&binding, 1).is_ok());

        let missing = binding.validate_session(&HeaderMap::new()).unwrap_err();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let mut wrong = HeaderMap::new();
        wrong.insert(SESSION_ID_HEADER, HeaderValue::from_static("other"));
        assert_eq!(
            binding.validate_session(&wrong).unwrap_err().status(),
            StatusCode::NOT_FOUND
        );

        let mut right = HeaderMap::new();
        right.insert(SESSION_ID_HEADER, HeaderValue::from_static("abc"));
        assert!(binding.validate_session(&right).is_ok());

        binding.rebind_session_id(SessionId::from("other"));
        assert!(binding.validate_session(&wrong).is_ok());
    }

    #[test]
    fn test_responses_reach_their_waiter() {
        let binding = StreamableHttpBinding::new(StreamableHttpOptions::default());
        let (tx, mut rx) = oneshot::channel();
        lock(&binding.pending).insert(jsonrpc::id_key(&json!(5)), tx);

        binding.deliver(json!({"jsonrpc": "2.0", "id": 5, "result": {"ok": true}}));
        assert_eq!(rx.try_recv().unwrap()["result"]["ok"], json!(true));
        assert!(lock(&binding.pending).is_empty());
    }

    #[test]
    fn test_close_fires_hook_with_current_id() {
        let binding = StreamableHttpBinding::new(fixed_id_options("first"));
        assert!(StreamableHttpBinding::initialize(&binding, 1).is_ok());
        binding.rebind_session_id(SessionId::from("second"));

        let (tx, rx) = std::sync::mpsc::channel();
        binding.on_close(Box::new(move |session_id: Option<&SessionId>| {
            let _ = tx.send(session_id.cloned());
        }));
        binding.close();
        binding.close();

        assert_eq!(rx.recv().unwrap(), Some(SessionId::from("second")));
        assert!(rx.try_recv().is_err());
        assert!(binding.is_closed());
    }
}
