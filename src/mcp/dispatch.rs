//! Dispatch core: every cross-cutting policy of a tool call, applied exactly once.
//!
//! Order per invocation: lookup, decode, feature gate, confirmation, authorization,
//! handler (observed, panic-safe, bounded by cancellation and deadline), shaping.
//! Decoding never touches the cluster; gating runs before any permission query;
//! authorization runs before the handler can write.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::FutureExt;
use rmcp::model::{CallToolResult, Tool};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::error::ToolError;
use super::tool::{DecodedArgs, ToolContext, ToolResult};
use crate::authz::{AuthorizationCache, CallerIdentity};
use crate::config::{Config, DeniedResource, ToolsetFlags};
use crate::kube::ClientProvider;
use crate::observability::{Metrics, ToolScope};
use crate::registry::{RegisteredTool, ToolRegistry};

/// The reloadable part of dispatch behaviour.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub require_rbac: bool,
    pub denied_resources: Vec<DeniedResource>,
    pub toolsets: ToolsetFlags,
    /// Upper bound on a single call; zero means unbounded.
    pub timeout: Duration,
}

impl DispatchPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            require_rbac: config.security.require_rbac,
            denied_resources: config.security.denied_resources.clone(),
            toolsets: config.toolsets.clone(),
            timeout: config.kubernetes.timeout,
        }
    }

    fn is_denied(&self, group: &str, resource: &str) -> bool {
        self.denied_resources
            .iter()
            .any(|denied| denied.group == group && denied.resource == resource)
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-request inputs from the transport.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub identity: CallerIdentity,
    pub cancel: CancellationToken,
    /// Caller-supplied deadline; the policy timeout still applies when shorter.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new(identity: CallerIdentity, cancel: CancellationToken) -> Self {
        Self {
            identity,
            cancel,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

pub struct DispatchCore {
    registry: Arc<ToolRegistry>,
    clients: Arc<ClientProvider>,
    authz: Arc<AuthorizationCache>,
    metrics: Arc<Metrics>,
    policy: ArcSwap<DispatchPolicy>,
}

impl DispatchCore {
    pub fn new(
        registry: Arc<ToolRegistry>,
        clients: Arc<ClientProvider>,
        authz: Arc<AuthorizationCache>,
        metrics: Arc<Metrics>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            registry,
            clients,
            authz,
            metrics,
            policy: ArcSwap::from_pointee(policy),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn clients(&self) -> &Arc<ClientProvider> {
        &self.clients
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn policy(&self) -> Arc<DispatchPolicy> {
        self.policy.load_full()
    }

    pub fn set_policy(&self, policy: DispatchPolicy) {
        self.policy.store(Arc::new(policy));
    }

    /// Advertised tools, under their external names.
    pub fn tools(&self) -> Vec<Tool> {
        self.registry
            .list()
            .iter()
            .map(|tool| tool.descriptor.to_tool(&tool.external))
            .collect()
    }

    /// Run a call and shape the outcome into a tool result. Failures are results with
    /// `is_error` set, never protocol errors.
    pub async fn dispatch(&self, name: &str, arguments: Value, options: CallOptions) -> CallToolResult {
        match self.invoke(name, arguments, options).await {
            Ok(output) => output.into_result(),
            Err(error) => error.into_result(),
        }
    }

    pub async fn invoke(&self, name: &str, arguments: Value, options: CallOptions) -> ToolResult {
        let Some(tool) = self.registry.lookup(name) else {
            tracing::warn!(tool = %name, "call to unknown tool");
            return Err(ToolError::UnknownTool {
                name: name.to_string(),
            });
        };

        let decoded = tool.descriptor.handler.decode(arguments).inspect_err(|error| {
            tracing::info!(tool = %tool.canonical, error = %error, "rejected tool arguments");
        })?;

        let policy = self.policy.load_full();
        let timeout = match (options.timeout, policy.timeout.is_zero()) {
            (Some(requested), true) => Some(requested),
            (Some(requested), false) => Some(requested.min(policy.timeout)),
            (None, true) => None,
            (None, false) => Some(policy.timeout),
        };
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                tracing::info!(tool = %tool.canonical, "tool call cancelled");
                Err(ToolError::Cancelled)
            }
            _ = deadline => {
                let timeout = timeout.unwrap_or_default();
                tracing::warn!(tool = %tool.canonical, timeout_ms = timeout.as_millis() as u64, "tool call deadline exceeded");
                Err(ToolError::DeadlineExceeded { timeout })
            }
            result = self.run(tool, decoded, &policy, &options) => result,
        }
    }

    async fn run(
        &self,
        tool: &RegisteredTool,
        decoded: DecodedArgs,
        policy: &DispatchPolicy,
        options: &CallOptions,
    ) -> ToolResult {
        let descriptor = &tool.descriptor;
        let scope = decoded.scope.clone();
        let reject = |error: ToolError| {
            tracing::info!(
                tool = %tool.canonical,
                caller = %options.identity.subject,
                error_kind = error.kind(),
                "tool call rejected"
            );
            Err(error)
        };

        // ============================================================
        // Feature gate
        // ============================================================

        if !policy.toolsets.is_enabled(&tool.toolset) {
            return reject(ToolError::feature_disabled(format!(
                "the {} toolset is disabled by configuration",
                tool.toolset
            )));
        }
        if let Some(reason) = scope.unsupported.clone() {
            return reject(ToolError::feature_disabled(reason));
        }

        let bundle = self.clients.get(&scope.context).await?;

        if let Some(gate) = &descriptor.gate {
            if !gate.satisfied_by(&bundle.catalog) {
                if let Err(e) = bundle.catalog.refresh().await {
                    tracing::warn!(tool = %tool.canonical, error = %e, "capability refresh failed");
                }
                if !gate.satisfied_by(&bundle.catalog) {
                    return reject(ToolError::FeatureNotInstalled {
                        feature: gate.feature.clone(),
                        missing: gate.missing(),
                    });
                }
            }
        }

        // ============================================================
        // Confirmation
        // ============================================================

        if descriptor.destructive && descriptor.has_confirm() && !scope.confirm {
            return reject(ToolError::ConfirmationRequired {
                tool: tool.canonical.clone(),
            });
        }

        // ============================================================
        // Authorization
        // ============================================================

        if let Some(rule) = scope.access.clone().or_else(|| descriptor.access.clone()) {
            let requested = scope
                .namespace
                .as_deref()
                .filter(|ns| !ns.is_empty())
                .or(descriptor.default_namespace.as_deref());
            let namespace = rule
                .namespaced
                .then(|| bundle.namespace_or_default(requested));
            let attributes = rule.attributes(namespace);

            if policy.is_denied(&attributes.group, &attributes.resource) {
                return reject(ToolError::Forbidden { attributes });
            }
            if policy.require_rbac {
                let allowed = self
                    .authz
                    .allowed(bundle.api.as_ref(), &bundle.context, &options.identity, &attributes)
                    .await?;
                if !allowed {
                    return reject(ToolError::Forbidden { attributes });
                }
            }
        }

        // ============================================================
        // Handler
        // ============================================================

        let observed = ToolScope::open(
            Arc::clone(&self.metrics),
            &tool.canonical,
            &bundle.context,
            &options.identity.subject,
        );
        let span = observed.span();
        let context = ToolContext {
            bundle,
            identity: options.identity.clone(),
            cancel: options.cancel.clone(),
            default_namespace: descriptor.default_namespace.clone(),
        };

        let call = descriptor.handler.call(context, decoded);
        let result = match AssertUnwindSafe(call).catch_unwind().instrument(span).await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(tool = %tool.canonical, panic = %message, "tool handler panicked");
                Err(ToolError::internal(format!("handler panicked: {}", message)))
            }
        };
        observed.close(&result);
        result
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
