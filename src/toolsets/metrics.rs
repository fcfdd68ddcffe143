//! `metrics` toolset: resource usage from the metrics API.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{json, kinds, kube_error, text, ToolsetDeps};
use crate::kube::{list_items, ListOptions};
use crate::mcp::{AccessRule, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolResult};
use crate::registry::Toolset;

const METRICS_GROUP: &str = "metrics.k8s.io";

pub struct MetricsToolset {
    enabled: bool,
}

impl MetricsToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        Self {
            enabled: deps.config.toolsets.metrics && deps.catalog.contains(&kinds::pod_metrics()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Cpu,
    Memory,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PodsTopArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub all_namespaces: bool,
    #[serde(default)]
    pub label_selector: Option<String>,
    /// Sort order, highest first
    #[serde(default)]
    pub sort_by: SortBy,
    /// Return at most this many pods
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ToolArgs for PodsTopArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        let rule = AccessRule::new("list", METRICS_GROUP, "pods");
        Some(if self.all_namespaces {
            rule.cluster_scoped()
        } else {
            rule
        })
    }
}

async fn pods_top(ctx: ToolContext, args: PodsTopArgs) -> ToolResult {
    let gvr = ctx
        .catalog()
        .lookup(&kinds::pod_metrics())
        .ok_or_else(|| ToolError::MetricsUnavailable {
            message: "the cluster does not serve metrics.k8s.io; install metrics-server".into(),
        })?;
    let namespace = (!args.all_namespaces).then(|| ctx.namespace(args.namespace.as_deref()));
    let options = ListOptions {
        label_selector: args.label_selector.clone(),
        limit: None,
    };
    let list = ctx
        .api()
        .list(&gvr, namespace.as_deref(), &options)
        .await
        .map_err(kube_error(METRICS_GROUP))?;

    let mut pods: Vec<PodUsage> = list_items(&list).iter().map(PodUsage::from_metrics).collect();
    match args.sort_by {
        SortBy::Cpu => pods.sort_by(|a, b| b.cpu_millicores.cmp(&a.cpu_millicores)),
        SortBy::Memory => pods.sort_by(|a, b| b.memory_bytes.cmp(&a.memory_bytes)),
    }
    if let Some(limit) = args.limit {
        pods.truncate(limit);
    }

    json(json!({
        "sort_by": args.sort_by,
        "pods": pods.iter().map(PodUsage::to_json).collect::<Vec<_>>(),
    }))
}

struct PodUsage {
    name: String,
    namespace: String,
    cpu_millicores: u64,
    memory_bytes: u64,
    containers: Vec<Value>,
}

impl PodUsage {
    fn from_metrics(item: &Value) -> Self {
        let mut cpu = 0;
        let mut memory = 0;
        let mut containers = Vec::new();
        for container in item
            .get("containers")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let c = parse_cpu(&text(container, "/usage/cpu")).unwrap_or(0);
            let m = parse_memory(&text(container, "/usage/memory")).unwrap_or(0);
            cpu += c;
            memory += m;
            containers.push(json!({
                "name": text(container, "/name"),
                "cpu_millicores": c,
                "memory_bytes": m,
            }));
        }
        Self {
            name: text(item, "/metadata/name"),
            namespace: text(item, "/metadata/namespace"),
            cpu_millicores: cpu,
            memory_bytes: memory,
            containers,
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "namespace": self.namespace,
            "cpu_millicores": self.cpu_millicores,
            "memory_bytes": self.memory_bytes,
            "containers": self.containers,
        })
    }
}

/// CPU quantity in millicores: `250m`, `1`, `1.5`, `12345678n`, `500u`.
pub fn parse_cpu(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }
    let (number, scale) = match quantity.char_indices().last()? {
        (i, 'n') => (&quantity[..i], 1e-6),
        (i, 'u') => (&quantity[..i], 1e-3),
        (i, 'm') => (&quantity[..i], 1.0),
        _ => (quantity, 1000.0),
    };
    let value: f64 = number.parse().ok()?;
    Some((value * scale).round() as u64)
}

/// Memory quantity in bytes: binary (`Ki`, `Mi`, `Gi`, `Ti`) and decimal (`k`, `M`,
/// `G`, `T`) suffixes, or a plain byte count.
pub fn parse_memory(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
    ];
    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| quantity.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((quantity, 1.0));
    let value: f64 = number.parse().ok()?;
    Some((value * scale).round() as u64)
}

impl Toolset for MetricsToolset {
    fn name(&self) -> &str {
        "metrics"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new(
            "metrics.pods_top",
            "Show pod CPU and memory usage from the metrics API, highest first",
            pods_top,
        )]
    }
}
