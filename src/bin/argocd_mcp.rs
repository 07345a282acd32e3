use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::{self, layer::SubscriberExt, util::SubscriberInitExt};

use argocd_mcp::server::create_server;
use argocd_mcp::transport::http_server::{HttpServerApp, MCP_PATH};
use argocd_mcp::transport::sse_server::{SSE_PATH, SseServerApp};
use argocd_mcp::types::{API_TOKEN_ENV, ArgocdCredentials, BASE_URL_ENV};

#[derive(Parser)]
#[command(author, version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Argo CD MCP Server - Model Context Protocol server for Argo CD applications")]
#[command(
    long_about = "Argo CD MCP Server exposes Argo CD applications, resource trees and sync operations through the Model Context Protocol. It runs over stdin/stdout for subprocess integration, or over HTTP with either the legacy SSE transport (/sse + /messages) or the streamable HTTP transport (/mcp). HTTP clients pass Argo CD credentials in the x-argocd-base-url and x-argocd-api-token headers."
)]
#[command(propagate_version = true)]
#[command(disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in stdin/stdout mode for MCP client integration like Claude Desktop
    Stdio {
        /// Enable debug logging for troubleshooting and development
        #[arg(short, long)]
        debug: bool,

        /// Argo CD server URL (overrides ARGOCD_BASE_URL environment variable)
        #[arg(short = 'u', long)]
        argocd_base_url: Option<String>,

        /// Argo CD API token (overrides ARGOCD_API_TOKEN environment variable)
        #[arg(short = 't', long)]
        argocd_api_token: Option<String>,
    },
    /// Run the server with the legacy SSE interface (GET /sse, POST /messages)
    Sse {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Enable debug logging for troubleshooting and development
        #[arg(short, long)]
        debug: bool,
    },
    /// Run the server with the streamable HTTP interface (POST/GET/DELETE /mcp)
    Http {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,

        /// Enable debug logging for troubleshooting and development
        #[arg(short, long)]
        debug: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stdio {
            debug,
            argocd_base_url,
            argocd_api_token,
        } => {
            init_tracing(debug);

            // Flags win over the environment, field by field
            let from_env = ArgocdCredentials::from_env();
            let credentials = ArgocdCredentials::new(
                argocd_base_url.unwrap_or(from_env.base_url),
                argocd_api_token.unwrap_or(from_env.api_token),
            );
            if !credentials.is_complete() {
                tracing::warn!(
                    "{} or {} is not set; tool calls will fail until both are provided",
                    BASE_URL_ENV,
                    API_TOKEN_ENV
                );
            }

            argocd_mcp::transport::stdio::run_stdio_server(create_server, credentials).await
        }
        Commands::Sse { port, debug } => {
            init_tracing(debug);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            tracing::info!("Access the Argo CD MCP Server at http://{}{}", addr, SSE_PATH);

            SseServerApp::new(addr, create_server).serve().await
        }
        Commands::Http { port, debug } => {
            init_tracing(debug);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            tracing::info!("Access the Argo CD MCP Server at http://{}{}", addr, MCP_PATH);

            // Environment credentials fill in whatever initialization headers omit
            HttpServerApp::new(addr, create_server, ArgocdCredentials::from_env())
                .serve()
                .await
        }
    }
}

/// Logs go to stderr so stdout stays reserved for the stdio protocol stream
fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},{}", level, env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();
}
