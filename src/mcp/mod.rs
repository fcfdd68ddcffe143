//! MCP server exposing Kubernetes tools.

mod dispatch;
mod error;
mod tool;

use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use dispatch::{CallOptions, DispatchCore, DispatchPolicy};
pub use error::ToolError;
pub use tool::{
    input_schema, AccessRule, ArgScope, DecodedArgs, FeatureGate, ToolArgs, ToolContext,
    ToolDescriptor, ToolHandler, ToolOutput, ToolResult, TypedHandler,
};

use crate::authz::CallerIdentity;

const INSTRUCTIONS: &str = r#"Kubernetes cluster management tools.

CONVENTIONS:
- Tools are grouped by toolset: core, metrics, backup, autoscaling, gitops, certificates, helm.
- Most tools accept an optional "context" (kubeconfig context; default when omitted) and
  "namespace" (the context's default namespace when omitted).
- Results are compact JSON summaries, not raw API objects.

SAFETY:
- Destructive tools require "confirm": true. Without it they return ConfirmationRequired
  and change nothing. Ask the user before confirming.
- Tools that support "dry_run" validate against the API server without persisting.
- Every call is checked against the cluster's RBAC first; a Forbidden error names the
  verb, group, resource and namespace that were denied.

ERRORS:
Failures come back as {"error":{"type","message","details"}}. FeatureNotInstalled means
the cluster lacks the extension (for example Velero or cert-manager); FeatureDisabled
means the operation is turned off or unsupported for that variant."#;

/// The MCP [`ServerHandler`]. Cheap to clone; every transport session shares one
/// [`DispatchCore`].
#[derive(Clone)]
pub struct KubeMcpServer {
    name: String,
    core: Arc<DispatchCore>,
}

impl KubeMcpServer {
    pub fn new(name: impl Into<String>, core: Arc<DispatchCore>) -> Self {
        Self {
            name: name.into(),
            core,
        }
    }

    pub fn core(&self) -> &Arc<DispatchCore> {
        &self.core
    }
}

/// Caller verified by the HTTP bearer middleware, or the ambient identity.
fn caller_identity(context: &RequestContext<RoleServer>) -> CallerIdentity {
    context
        .extensions
        .get::<axum::http::request::Parts>()
        .and_then(|parts| parts.extensions.get::<CallerIdentity>())
        .cloned()
        .unwrap_or_default()
}

impl ServerHandler for KubeMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: self.name.clone(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(INSTRUCTIONS.into()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.core.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let options = CallOptions::new(caller_identity(&context), context.ct.clone());
        let arguments = request.arguments.map(Value::Object).unwrap_or(Value::Null);
        Ok(self.core.dispatch(&request.name, arguments, options).await)
    }
}

/// Serve one peer over stdin/stdout until it disconnects or `shutdown` fires.
pub async fn run_stdio_server(server: KubeMcpServer, shutdown: CancellationToken) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let running = server.serve((stdin(), stdout())).await?;
    let cancel = running.cancellation_token();

    tokio::select! {
        quit_reason = running.waiting() => {
            tracing::info!("MCP server stopped: {:?}", quit_reason?);
        }
        _ = shutdown.cancelled() => {
            tracing::info!("MCP stdio server shutting down");
            cancel.cancel();
        }
    }

    Ok(())
}
