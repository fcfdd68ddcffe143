//! `core` toolset: contexts, namespaces, pods, logs and generic deletion.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{int, json, text, ToolsetDeps};
use crate::kube::{list_items, ClientProvider, Gvr, ListOptions, LogOptions, NameRule};
use crate::mcp::{AccessRule, ToolArgs, ToolContext, ToolDescriptor, ToolResult};
use crate::registry::Toolset;

const DEFAULT_TAIL_LINES: i64 = 100;
const MAX_TAIL_LINES: i64 = 2000;

pub struct CoreToolset {
    enabled: bool,
    clients: Arc<ClientProvider>,
}

impl CoreToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        Self {
            enabled: deps.config.toolsets.core,
            clients: Arc::clone(&deps.clients),
        }
    }
}

fn pods() -> Gvr {
    Gvr::new("", "v1", "pods", true)
}

fn namespaces() -> Gvr {
    Gvr::new("", "v1", "namespaces", false)
}

// ============================================================
// Arguments
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ContextsListArgs {}

impl ToolArgs for ContextsListArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NamespacesListArgs {
    /// Kubeconfig context; the default context when omitted
    #[serde(default)]
    pub context: String,
}

impl ToolArgs for NamespacesListArgs {
    fn context(&self) -> &str {
        &self.context
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PodsListArgs {
    /// Kubeconfig context; the default context when omitted
    #[serde(default)]
    pub context: String,
    /// Namespace; the context's default namespace when omitted
    #[serde(default)]
    pub namespace: Option<String>,
    /// List pods in every namespace
    #[serde(default)]
    pub all_namespaces: bool,
    /// Label selector, e.g. "app=web,tier!=cache"
    #[serde(default)]
    pub label_selector: Option<String>,
    /// Maximum number of pods to return
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ToolArgs for PodsListArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        let rule = AccessRule::new("list", "", "pods");
        Some(if self.all_namespaces {
            rule.cluster_scoped()
        } else {
            rule
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PodLogsArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Pod name
    pub name: String,
    /// Container; required for multi-container pods
    #[serde(default)]
    pub container: Option<String>,
    /// Number of trailing lines (default 100, at most 2000)
    #[serde(default)]
    pub tail_lines: Option<i64>,
    /// Only lines newer than this many seconds
    #[serde(default)]
    pub since_seconds: Option<i64>,
    /// Live streaming is not available; a short window is returned instead
    #[serde(default)]
    pub follow: bool,
}

impl ToolArgs for PodLogsArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        vec![("name", NameRule::Subdomain, &self.name)]
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ResourceDeleteArgs {
    #[serde(default)]
    pub context: String,
    /// API group; empty for the core group
    #[serde(default)]
    pub group: String,
    /// API version, e.g. "v1"
    pub version: String,
    /// Plural resource name, e.g. "configmaps"
    pub resource: String,
    pub name: String,
    /// Namespace of a namespaced resource; omit for cluster-scoped resources
    #[serde(default)]
    pub namespace: Option<String>,
    /// Validate without deleting
    #[serde(default)]
    pub dry_run: bool,
    /// Must be true to delete
    #[serde(default)]
    pub confirm: bool,
}

impl ToolArgs for ResourceDeleteArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn confirm(&self) -> bool {
        self.confirm
    }

    fn access(&self) -> Option<AccessRule> {
        let rule = AccessRule::new("delete", &self.group, &self.resource);
        Some(if self.namespace.is_some() {
            rule
        } else {
            rule.cluster_scoped()
        })
    }

    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        let mut names = vec![
            ("version", NameRule::Label, self.version.as_str()),
            ("resource", NameRule::Label, self.resource.as_str()),
            ("name", NameRule::PathSegment, self.name.as_str()),
        ];
        if !self.group.is_empty() {
            names.push(("group", NameRule::Subdomain, self.group.as_str()));
        }
        names
    }
}

// ============================================================
// Handlers
// ============================================================

async fn contexts_list(clients: Arc<ClientProvider>) -> ToolResult {
    json(json!({
        "current": clients.current_context(),
        "contexts": clients.contexts(),
    }))
}

async fn namespaces_list(ctx: ToolContext, _args: NamespacesListArgs) -> ToolResult {
    let list = ctx
        .api()
        .list(&namespaces(), None, &ListOptions::default())
        .await?;
    let namespaces: Vec<Value> = list_items(&list).iter().map(summarize_namespace).collect();
    json(json!({ "cluster": ctx.cluster(), "namespaces": namespaces }))
}

async fn pods_list(ctx: ToolContext, args: PodsListArgs) -> ToolResult {
    let namespace = (!args.all_namespaces).then(|| ctx.namespace(args.namespace.as_deref()));
    let options = ListOptions {
        label_selector: args.label_selector.clone(),
        limit: args.limit,
    };
    let list = ctx.api().list(&pods(), namespace.as_deref(), &options).await?;
    let pods: Vec<Value> = list_items(&list).iter().map(summarize_pod).collect();
    json(json!({ "count": pods.len(), "pods": pods }))
}

async fn pod_logs(ctx: ToolContext, args: PodLogsArgs) -> ToolResult {
    let namespace = ctx.namespace(args.namespace.as_deref());
    let tail_lines = args
        .tail_lines
        .unwrap_or(DEFAULT_TAIL_LINES)
        .clamp(1, MAX_TAIL_LINES);
    let options = LogOptions {
        container: args.container.clone(),
        tail_lines: Some(tail_lines),
        since_seconds: args.since_seconds,
    };
    let logs = ctx.api().pod_logs(&namespace, &args.name, &options).await?;

    let mut result = json!({
        "pod": args.name,
        "namespace": namespace,
        "container": args.container,
        "lines": logs.lines().count(),
        "logs": logs,
    });
    if args.follow {
        result["note"] = json!(format!(
            "Log streaming is not available through tool calls; returned the last {} lines. \
             Use `kubectl logs -f {} -n {}` for live output.",
            tail_lines, args.name, namespace
        ));
    }
    json(result)
}

async fn resource_delete(ctx: ToolContext, args: ResourceDeleteArgs) -> ToolResult {
    let gvr = Gvr::new(&args.group, &args.version, &args.resource, args.namespace.is_some());
    let status = ctx
        .api()
        .delete(&gvr, args.namespace.as_deref(), &args.name, args.dry_run)
        .await?;
    tracing::info!(
        cluster = ctx.cluster(),
        resource = %args.resource,
        name = %args.name,
        dry_run = args.dry_run,
        "deleted resource"
    );
    json(json!({
        "deleted": {
            "group": args.group,
            "version": args.version,
            "resource": args.resource,
            "name": args.name,
            "namespace": args.namespace,
        },
        "dry_run": args.dry_run,
        "status": text(&status, "/status"),
    }))
}

// ============================================================
// Normalizers
// ============================================================

fn summarize_namespace(item: &Value) -> Value {
    json!({
        "name": text(item, "/metadata/name"),
        "phase": text(item, "/status/phase"),
        "created": text(item, "/metadata/creationTimestamp"),
    })
}

pub(crate) fn summarize_pod(item: &Value) -> Value {
    let statuses = item
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let total = item
        .pointer("/spec/containers")
        .and_then(Value::as_array)
        .map_or(statuses.len(), Vec::len);
    let ready = statuses
        .iter()
        .filter(|s| s.get("ready").and_then(Value::as_bool) == Some(true))
        .count();
    let restarts: i64 = statuses
        .iter()
        .filter_map(|s| int(s, "/restartCount"))
        .sum();
    let waiting_reason = statuses
        .iter()
        .find_map(|s| s.pointer("/state/waiting/reason").and_then(Value::as_str));

    json!({
        "name": text(item, "/metadata/name"),
        "namespace": text(item, "/metadata/namespace"),
        "phase": waiting_reason.map(str::to_string).unwrap_or_else(|| text(item, "/status/phase")),
        "ready": format!("{}/{}", ready, total),
        "restarts": restarts,
        "node": text(item, "/spec/nodeName"),
        "ip": text(item, "/status/podIP"),
        "created": text(item, "/metadata/creationTimestamp"),
    })
}

// ============================================================
// Registration
// ============================================================

impl Toolset for CoreToolset {
    fn name(&self) -> &str {
        "core"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let clients = Arc::clone(&self.clients);
        vec![
            ToolDescriptor::new(
                "core.contexts_list",
                "List kubeconfig contexts and the current default",
                move |_ctx, _args: ContextsListArgs| contexts_list(Arc::clone(&clients)),
            ),
            ToolDescriptor::new(
                "core.namespaces_list",
                "List namespaces with their phase",
                namespaces_list,
            )
            .requires_cluster("list", "", "namespaces"),
            ToolDescriptor::new(
                "core.pods_list",
                "List pods with readiness, restarts and node placement",
                pods_list,
            ),
            ToolDescriptor::new(
                "core.pod_logs",
                "Fetch the last lines of a pod's logs (short window; never follows)",
                pod_logs,
            )
            .requires_subresource("get", "", "pods", "log"),
            ToolDescriptor::new(
                "core.resource_delete",
                "Delete any resource by group, version, resource and name. Requires confirm=true",
                resource_delete,
            )
            .destructive(),
        ]
    }
}
