//! Toolsets and their assembly.
//!
//! Each toolset inspects the capability catalog once, at construction, and advertises
//! only the tools the cluster can serve. Tools that survive registration still pass the
//! dispatch feature gate, which refreshes the catalog when an extension appears later.

pub mod autoscaling;
pub mod backup;
pub mod certificates;
pub mod cluster;
pub mod gitops;
pub mod helm;
pub mod metrics;

use std::sync::Arc;

use serde_json::Value;

use crate::capability::CapabilityCatalog;
use crate::config::{Config, SecurityConfig};
use crate::kube::{ClientProvider, KubeError};
use crate::mcp::{ToolDescriptor, ToolError, ToolOutput, ToolResult};
use crate::registry::{RegistryError, ToolRegistry, Toolset};

/// What toolsets are built from.
#[derive(Clone)]
pub struct ToolsetDeps {
    pub clients: Arc<ClientProvider>,
    /// Catalog of the default context, used for startup capability flags.
    pub catalog: Arc<CapabilityCatalog>,
    pub config: Arc<Config>,
}

/// Well-known extension kinds.
pub mod kinds {
    use crate::kube::Gvk;

    pub fn velero_backup() -> Gvk {
        Gvk::new("velero.io", "v1", "Backup")
    }

    pub fn velero_restore() -> Gvk {
        Gvk::new("velero.io", "v1", "Restore")
    }

    pub fn velero_schedule() -> Gvk {
        Gvk::new("velero.io", "v1", "Schedule")
    }

    pub fn velero_delete_request() -> Gvk {
        Gvk::new("velero.io", "v1", "DeleteBackupRequest")
    }

    pub fn flux_kustomization() -> Gvk {
        Gvk::new("kustomize.toolkit.fluxcd.io", "v1", "Kustomization")
    }

    pub fn flux_helm_release() -> Gvk {
        Gvk::new("helm.toolkit.fluxcd.io", "v2", "HelmRelease")
    }

    pub fn argo_application() -> Gvk {
        Gvk::new("argoproj.io", "v1alpha1", "Application")
    }

    pub fn certificate() -> Gvk {
        Gvk::new("cert-manager.io", "v1", "Certificate")
    }

    pub fn pod_metrics() -> Gvk {
        Gvk::new("metrics.k8s.io", "v1beta1", "PodMetrics")
    }
}

/// Every toolset, in registration order.
pub fn assemble(deps: &ToolsetDeps) -> Vec<Box<dyn Toolset>> {
    vec![
        Box::new(cluster::CoreToolset::new(deps)),
        Box::new(metrics::MetricsToolset::new(deps)),
        Box::new(backup::BackupToolset::new(deps)),
        Box::new(autoscaling::AutoscalingToolset::new(deps)),
        Box::new(gitops::GitopsToolset::new(deps)),
        Box::new(certificates::CertificatesToolset::new(deps)),
        Box::new(helm::HelmToolset::new(deps)),
    ]
}

/// Drops tools the security configuration forbids from ever being advertised.
struct SecurityFilter<'a> {
    inner: &'a dyn Toolset,
    read_only: bool,
    non_destructive: bool,
}

impl Toolset for SecurityFilter<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn enabled(&self) -> bool {
        self.inner.enabled()
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.inner
            .tools()
            .into_iter()
            .filter(|tool| !(self.read_only && !tool.read_only))
            .filter(|tool| !(self.non_destructive && tool.destructive))
            .collect()
    }
}

/// Register `toolsets` under the security configuration's read-only and
/// non-destructive filters.
pub fn build_registry(
    toolsets: &[Box<dyn Toolset>],
    security: &SecurityConfig,
    normalize: bool,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new(normalize);
    for toolset in toolsets {
        let filtered = SecurityFilter {
            inner: toolset.as_ref(),
            read_only: security.read_only,
            non_destructive: security.non_destructive,
        };
        let count = registry.register(&filtered)?;
        tracing::info!(
            toolset = toolset.name(),
            enabled = toolset.enabled(),
            tools = count,
            "toolset assembled"
        );
    }
    Ok(registry)
}

// ============================================================
// Handler helpers
// ============================================================

pub(crate) fn json(value: Value) -> ToolResult {
    Ok(ToolOutput::Json(value))
}

/// Cluster error raised while talking to `group`.
pub(crate) fn kube_error(group: &'static str) -> impl Fn(KubeError) -> ToolError {
    move |error| ToolError::from_kube(error, group)
}

/// String at a JSON pointer, or empty.
pub(crate) fn text(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn opt_text(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn int(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(Value::as_i64)
}

/// The status condition of `kind`, if reported.
pub(crate) fn condition<'a>(item: &'a Value, kind: &str) -> Option<&'a Value> {
    item.pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(kind))
}

/// `"True"`/`"False"`/`"Unknown"` of a condition as a tri-state.
pub(crate) fn condition_status(item: &Value, kind: &str) -> Option<bool> {
    match condition(item, kind)?.get("status").and_then(Value::as_str) {
        Some("True") => Some(true),
        Some("False") => Some(false),
        _ => None,
    }
}

pub(crate) fn conditions(item: &Value) -> Vec<Value> {
    item.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "type": text(c, "/type"),
                        "status": text(c, "/status"),
                        "reason": text(c, "/reason"),
                        "message": text(c, "/message"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_lookup_reads_status() {
        let item = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True"},
            {"type": "Stalled", "status": "False"},
            {"type": "Reconciling", "status": "Unknown"}
        ]}});
        assert_eq!(condition_status(&item, "Ready"), Some(true));
        assert_eq!(condition_status(&item, "Stalled"), Some(false));
        assert_eq!(condition_status(&item, "Reconciling"), None);
        assert_eq!(condition_status(&item, "Missing"), None);
    }

    #[test]
    fn text_defaults_to_empty() {
        let item = json!({"metadata": {"name": "web"}});
        assert_eq!(text(&item, "/metadata/name"), "web");
        assert_eq!(text(&item, "/metadata/namespace"), "");
        assert_eq!(opt_text(&item, "/metadata/namespace"), None);
    }
}
