//! Transport layer implementations for the MCP server
//!
//! One logical server is exposed over three bindings: stdio (single implicit
//! session), legacy SSE, and streamable HTTP. The two HTTP bindings keep
//! their live sessions in a [`SessionRegistry`] and are fronted by routers
//! that decide, per request, which binding handles it.

use crate::types::SessionId;
use rmcp::ServerHandler;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tokio::sync::watch;

/// In-process message channel between an HTTP binding and its server
pub mod channel;

/// Typed errors for bindings, the registry and the routers
pub mod error;

/// Session id to binding map shared by the HTTP routers
pub mod registry;

/// SSE (Server-Sent Events) transport: `GET /sse` + `POST /messages`
pub mod sse_server;

/// Standard I/O transport for subprocess-based MCP communication
pub mod stdio;

/// Streamable HTTP binding: generic per-session request handler
pub mod streamable_http;

/// Streamable HTTP session router and server app for `/mcp`
pub mod http_server;

pub use error::{RegistryError, SessionRouteError, TransportError};
pub use registry::{AliasableBinding, SessionBinding, SessionRegistry};

/// Header carrying the streamable HTTP session id
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Callback fired once when a binding closes, with the binding's session id at that moment
pub type CloseHook = Box<dyn FnOnce(Option<&SessionId>) + Send>;

/// Capability shared by every transport binding.
///
/// A binding is connected to exactly one server instance for its whole life
/// and reports its end through close hooks.
pub trait TransportBinding: Send + Sync + 'static {
    /// Starts serving `server` over this binding.
    ///
    /// Returns once the server task is running; fails if already connected.
    fn connect<S: ServerHandler>(self: Arc<Self>, server: S) -> Result<(), TransportError>;

    /// Registers a hook run when the binding closes (immediately if already closed)
    fn on_close(&self, hook: CloseHook);

    /// Closes the binding; idempotent
    fn close(&self);
}

/// Close state and hooks of one binding
pub(crate) struct Lifecycle {
    closed: watch::Sender<bool>,
    hooks: Mutex<Vec<CloseHook>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed,
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn add_hook(&self, hook: CloseHook, session_id: Option<&SessionId>) {
        let mut hooks = lock(&self.hooks);
        if self.is_closed() {
            drop(hooks);
            hook(session_id);
            return;
        }
        hooks.push(hook);
    }

    /// Marks the lifecycle closed and runs every hook once.
    ///
    /// Returns false when it was already closed.
    pub(crate) fn close(&self, session_id: Option<&SessionId>) -> bool {
        let hooks = {
            let mut hooks = lock(&self.hooks);
            if self.is_closed() {
                return false;
            }
            self.closed.send_replace(true);
            std::mem::take(&mut *hooks)
        };
        for hook in hooks {
            hook(session_id);
        }
        true
    }

    /// Resolves once the lifecycle is closed
    pub(crate) async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook(counter: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<String>>>) -> CloseHook {
        let counter = Arc::clone(counter);
        let seen = Arc::clone(seen);
        Box::new(move |session_id: Option<&SessionId>| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = session_id {
                lock(&seen).push(id.to_string());
            }
        })
    }

    #[test]
    fn test_hooks_run_once_with_session_id() {
        let lifecycle = Lifecycle::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        lifecycle.add_hook(counting_hook(&counter, &seen), None);
        lifecycle.add_hook(counting_hook(&counter, &seen), None);

        let id = SessionId::from("abc");
        assert!(lifecycle.close(Some(&id)));
        assert!(!lifecycle.close(Some(&id)));

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(*lock(&seen), vec!["abc".to_string(), "abc".to_string()]);
    }

    #[test]
    fn test_late_hook_runs_immediately() {
        let lifecycle = Lifecycle::new();
        lifecycle.close(None);

        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        lifecycle.add_hook(counting_hook(&counter, &seen), Some(&SessionId::from("late")));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(*lock(&seen), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_close() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.closed().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        lifecycle.close(None);
        waiter.await.unwrap();
        assert!(lifecycle.is_closed());
    }
}
