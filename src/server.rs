//! Server construction for transport bindings
//!
//! Every binding owns exactly one freshly created server instance; nothing
//! here is shared between sessions.

use crate::tools::ArgocdTools;
use crate::types::ArgocdCredentials;
use rmcp::ServerHandler;

/// Produces one connectable server instance per session.
pub trait ServerFactory: Send + Sync + 'static {
    type Server: ServerHandler;

    /// Never fails, even for empty credentials; validation is the caller's job
    fn create_server(&self, credentials: ArgocdCredentials) -> Self::Server;
}

impl<F, S> ServerFactory for F
where
    F: Fn(ArgocdCredentials) -> S + Send + Sync + 'static,
    S: ServerHandler,
{
    type Server = S;

    fn create_server(&self, credentials: ArgocdCredentials) -> S {
        self(credentials)
    }
}

/// Default factory: an Argo CD tool server bound to `credentials`
pub fn create_server(credentials: ArgocdCredentials) -> ArgocdTools {
    ArgocdTools::new(credentials)
}
