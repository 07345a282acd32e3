//! MCP (Model Context Protocol) tool implementations for Argo CD
//!
//! This module provides the server instance handed to every transport
//! binding, exposing Argo CD application management as MCP tools.

use crate::argocd::{ArgocdClient, ArgocdError, client::SyncOptions};
use crate::formatter::application_list_markdown;
use crate::types::{ApplicationName, ArgocdCredentials};
use rmcp::{Error as McpError, ServerHandler, model::*, tool};
use serde_json::Value;

/// Argo CD tools exposed through the MCP protocol.
///
/// One instance is created per transport session; it owns the credentials
/// it was created with and builds its API client lazily per call.
#[derive(Clone)]
pub struct ArgocdTools {
    credentials: ArgocdCredentials,
}

impl ArgocdTools {
    pub fn new(credentials: ArgocdCredentials) -> Self {
        Self { credentials }
    }

    fn client(&self) -> Result<ArgocdClient, McpError> {
        ArgocdClient::new(&self.credentials, None).map_err(|e| {
            McpError::internal_error(format!("Failed to create Argo CD client: {}", e), None)
        })
    }
}

fn api_error(error: ArgocdError) -> McpError {
    McpError::internal_error(error.to_string(), None)
}

fn json_result(value: &Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Failed to serialize response: {}", e), None))?;
    Ok(CallToolResult {
        content: vec![Content::text(text)],
        is_error: Some(false),
    })
}

#[tool(tool_box)]
impl ArgocdTools {
    #[tool(
        description = "List Argo CD applications. Returns a markdown summary per application including namespace, project, sync status, health status and source. Examples: `{}` (all applications), `{\"search\": \"guestbook\"}` (applications whose name contains 'guestbook')"
    )]
    async fn list_applications(
        &self,
        #[tool(param)]
        #[schemars(description = "Optional search string to filter applications by name")]
        search: Option<String>,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client()?;
        let applications = client
            .list_applications(search.as_deref())
            .await
            .map_err(api_error)?;

        Ok(CallToolResult {
            content: vec![Content::text(application_list_markdown(&applications).0)],
            is_error: Some(false),
        })
    }

    #[tool(description = "Get the full Argo CD application resource by name, as JSON")]
    async fn get_application(
        &self,
        #[tool(param)]
        #[schemars(description = "Name of the Argo CD application, e.g. 'guestbook'")]
        application_name: String,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client()?;
        let application = client
            .get_application(&ApplicationName::from(application_name))
            .await
            .map_err(api_error)?;
        json_result(&application)
    }

    #[tool(
        description = "Get the resource tree (Kubernetes resources and their hierarchy) of an Argo CD application, as JSON"
    )]
    async fn get_application_resource_tree(
        &self,
        #[tool(param)]
        #[schemars(description = "Name of the Argo CD application")]
        application_name: String,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client()?;
        let tree = client
            .get_application_resource_tree(&ApplicationName::from(application_name))
            .await
            .map_err(api_error)?;
        json_result(&tree)
    }

    #[tool(
        description = "Get the managed resources of an Argo CD application with their live and target state, as JSON"
    )]
    async fn get_application_managed_resources(
        &self,
        #[tool(param)]
        #[schemars(description = "Name of the Argo CD application")]
        application_name: String,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client()?;
        let resources = client
            .get_application_managed_resources(&ApplicationName::from(application_name))
            .await
            .map_err(api_error)?;
        json_result(&resources)
    }

    #[tool(
        description = "Trigger a sync of an Argo CD application. Examples: `{\"application_name\": \"guestbook\"}`, `{\"application_name\": \"guestbook\", \"revision\": \"main\", \"prune\": true, \"dry_run\": true}`"
    )]
    async fn sync_application(
        &self,
        #[tool(param)]
        #[schemars(description = "Name of the Argo CD application to sync")]
        application_name: String,
        #[tool(param)]
        #[schemars(description = "Optional git revision to sync to (defaults to the target revision)")]
        revision: Option<String>,
        #[tool(param)]
        #[schemars(description = "Optional flag to delete resources no longer defined in git")]
        prune: Option<bool>,
        #[tool(param)]
        #[schemars(description = "Optional flag to preview the sync without applying it")]
        dry_run: Option<bool>,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client()?;
        let options = SyncOptions {
            revision,
            prune,
            dry_run,
        };
        let application = client
            .sync_application(&ApplicationName::from(application_name), &options)
            .await
            .map_err(api_error)?;
        json_result(&application)
    }
}

#[tool(tool_box)]
impl ServerHandler for ArgocdTools {
    fn get_info(&self) -> ServerInfo {
        let instructions = format!(
            r#"# Argo CD MCP Server

Inspect and operate Argo CD applications of the instance at {}.

## Available Tools

1. list_applications - summary of every application (optionally filtered by name)
2. get_application - full application resource
3. get_application_resource_tree - Kubernetes resource hierarchy of an application
4. get_application_managed_resources - live vs target state of managed resources
5. sync_application - trigger a sync (supports revision, prune and dry_run)

## Common Workflows

- Use list_applications to find OutOfSync or Degraded applications, then get_application for details
- Use sync_application with dry_run first to preview changes
"#,
            if self.credentials.base_url.is_empty() {
                "<unconfigured>"
            } else {
                self.credentials.base_url.as_str()
            }
        );

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(instructions),
        }
    }
}
