use crate::server::ServerFactory;
use crate::transport::{CloseHook, Lifecycle, TransportBinding, TransportError};
use crate::types::ArgocdCredentials;
use anyhow::Result;
use rmcp::transport::stdio;
use rmcp::{ServerHandler, ServiceExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Binding over the process's standard input/output.
///
/// One process, one implicit session: there is no session id and no registry.
pub struct StdioBinding {
    connected: AtomicBool,
    lifecycle: Lifecycle,
}

impl Default for StdioBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioBinding {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Resolves once the server stops (stdin closed or protocol error)
    pub async fn closed(&self) {
        self.lifecycle.closed().await
    }
}

impl TransportBinding for StdioBinding {
    fn connect<S: ServerHandler>(self: Arc<Self>, server: S) -> Result<(), TransportError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyConnected);
        }
        tokio::spawn(async move {
            match server.serve(stdio()).await {
                Ok(running) => {
                    if let Err(e) = running.waiting().await {
                        tracing::error!(error = %e, "stdio server task failed");
                    }
                }
                Err(e) => tracing::error!(error = %e, "stdio server failed to start"),
            }
            self.close();
        });
        Ok(())
    }

    fn on_close(&self, hook: CloseHook) {
        self.lifecycle.add_hook(hook, None);
    }

    fn close(&self) {
        self.lifecycle.close(None);
    }
}

/// Runs the MCP server in STDIN/STDOUT mode.
///
/// This mode is used when the server is launched as a subprocess by an MCP client,
/// communicating through standard input/output streams. Credentials are not
/// validated here; an unusable pair surfaces as tool-call errors.
///
/// # Arguments
/// * `factory` - Builds the single server instance for this process
/// * `credentials` - Argo CD base URL and API token handed to the factory
///
/// # Returns
/// * `Result<()>` - Success when server shuts down cleanly, or error
///
/// # Example
/// ```no_run
/// # use argocd_mcp::server::create_server;
/// # use argocd_mcp::transport::stdio::run_stdio_server;
/// # use argocd_mcp::types::ArgocdCredentials;
/// # async fn example() -> anyhow::Result<()> {
/// run_stdio_server(create_server, ArgocdCredentials::from_env()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_stdio_server<F: ServerFactory>(
    factory: F,
    credentials: ArgocdCredentials,
) -> Result<()> {
    let server = factory.create_server(credentials);
    let binding = Arc::new(StdioBinding::new());

    tracing::info!("Connecting to stdio transport");
    Arc::clone(&binding).connect(server)?;

    binding.closed().await;
    Ok(())
}
