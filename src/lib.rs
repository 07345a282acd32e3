/// Argo CD REST API client used by the MCP tools
pub mod argocd;

/// Markdown rendering of Argo CD resources for tool output
pub mod formatter;

/// Per-session server construction shared by all transports
pub mod server;

/// MCP tool implementations exposing Argo CD operations through the protocol
pub mod tools;

/// Transport layer implementations for MCP server modes (stdio, SSE, streamable HTTP)
pub mod transport;

/// Core type definitions: credentials, session ids, JSON-RPC envelopes and Argo CD models
pub mod types;
