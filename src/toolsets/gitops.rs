//! `gitops` toolset: Flux and Argo CD applications.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{condition, condition_status, json, kinds, opt_text, text, ToolsetDeps};
use crate::kube::{list_items, Gvk, ListOptions, NameRule};
use crate::mcp::{AccessRule, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolResult};
use crate::registry::Toolset;

const REQUESTED_AT: &str = "reconcile.fluxcd.io/requestedAt";

pub struct GitopsToolset {
    enabled: bool,
}

impl GitopsToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        let catalog = &deps.catalog;
        Self {
            enabled: deps.config.toolsets.gitops
                && (catalog.contains(&kinds::flux_kustomization())
                    || catalog.contains(&kinds::argo_application())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AppKind {
    /// Flux `Kustomization`
    Kustomization,
    /// Flux `HelmRelease`
    HelmRelease,
    /// Argo CD `Application`
    Application,
}

impl AppKind {
    const ALL: [AppKind; 3] = [AppKind::Kustomization, AppKind::HelmRelease, AppKind::Application];

    fn gvk(self) -> Gvk {
        match self {
            AppKind::Kustomization => kinds::flux_kustomization(),
            AppKind::HelmRelease => kinds::flux_helm_release(),
            AppKind::Application => kinds::argo_application(),
        }
    }

    fn resource(self) -> &'static str {
        match self {
            AppKind::Kustomization => "kustomizations",
            AppKind::HelmRelease => "helmreleases",
            AppKind::Application => "applications",
        }
    }

    fn dialect(self) -> &'static str {
        match self {
            AppKind::Kustomization | AppKind::HelmRelease => "flux",
            AppKind::Application => "argocd",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ApplicationsListArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub all_namespaces: bool,
    /// Only this kind; every installed kind when omitted
    #[serde(default)]
    pub kind: Option<AppKind>,
}

impl ToolArgs for ApplicationsListArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        let kind = self.kind?;
        let rule = AccessRule::new("list", &kind.gvk().group, kind.resource());
        Some(if self.all_namespaces {
            rule.cluster_scoped()
        } else {
            rule
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReconcileArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub kind: AppKind,
    pub name: String,
    #[serde(default)]
    pub dry_run: bool,
}

impl ToolArgs for ReconcileArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        Some(AccessRule::new(
            "patch",
            &self.kind.gvk().group,
            self.kind.resource(),
        ))
    }

    fn unsupported(&self) -> Option<String> {
        (self.kind == AppKind::Application).then(|| {
            "reconcile is not supported for Argo CD applications; sync them with Argo CD".to_string()
        })
    }

    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        vec![("name", NameRule::Subdomain, &self.name)]
    }
}

async fn applications_list(ctx: ToolContext, args: ApplicationsListArgs) -> ToolResult {
    let namespace = (!args.all_namespaces).then(|| ctx.namespace(args.namespace.as_deref()));
    let wanted: Vec<AppKind> = match args.kind {
        Some(kind) => vec![kind],
        None => AppKind::ALL.to_vec(),
    };

    let mut applications = Vec::new();
    let mut skipped = Vec::new();
    for kind in wanted {
        let Some(gvr) = ctx.catalog().lookup(&kind.gvk()) else {
            if args.kind.is_some() {
                return Err(ToolError::FeatureNotInstalled {
                    feature: "GitOps".into(),
                    missing: kind.gvk().to_string(),
                });
            }
            continue;
        };
        match ctx
            .api()
            .list(&gvr, namespace.as_deref(), &ListOptions::default())
            .await
        {
            Ok(list) => applications.extend(list_items(&list).iter().map(|item| summarize(kind, item))),
            // One forbidden kind should not hide the others.
            Err(err) if args.kind.is_none() && err.status_code() == Some(403) => {
                tracing::debug!(cluster = ctx.cluster(), kind = ?kind, "listing forbidden, skipped");
                skipped.push(json!({ "kind": kind, "reason": err.to_string() }));
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mut result = json!({ "namespace": namespace, "applications": applications });
    if !skipped.is_empty() {
        result["skipped"] = json!(skipped);
    }
    json(result)
}

async fn reconcile(ctx: ToolContext, args: ReconcileArgs) -> ToolResult {
    let gvr = ctx.resolve("Flux", &args.kind.gvk())?;
    let namespace = ctx.namespace(args.namespace.as_deref());
    let requested_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let patch = json!({ "metadata": { "annotations": { REQUESTED_AT: requested_at } } });

    ctx.api()
        .merge_patch(&gvr, Some(&namespace), &args.name, patch, args.dry_run)
        .await?;
    tracing::info!(
        cluster = ctx.cluster(),
        kind = ?args.kind,
        name = %args.name,
        namespace = %namespace,
        "requested Flux reconciliation"
    );
    json(json!({
        "kind": args.kind,
        "name": args.name,
        "namespace": namespace,
        "requested_at": requested_at,
        "dry_run": args.dry_run,
    }))
}

fn summarize(kind: AppKind, item: &Value) -> Value {
    let mut summary = json!({
        "dialect": kind.dialect(),
        "kind": kind,
        "name": text(item, "/metadata/name"),
        "namespace": text(item, "/metadata/namespace"),
    });
    let details = match kind {
        AppKind::Kustomization => json!({
            "ready": condition_status(item, "Ready"),
            "message": condition(item, "Ready").map(|c| text(c, "/message")),
            "revision": opt_text(item, "/status/lastAppliedRevision"),
            "source": format!(
                "{}/{}",
                text(item, "/spec/sourceRef/kind"),
                text(item, "/spec/sourceRef/name")
            ),
            "path": opt_text(item, "/spec/path"),
            "suspended": item.pointer("/spec/suspend").and_then(Value::as_bool).unwrap_or(false),
        }),
        AppKind::HelmRelease => json!({
            "ready": condition_status(item, "Ready"),
            "message": condition(item, "Ready").map(|c| text(c, "/message")),
            "chart": opt_text(item, "/spec/chart/spec/chart"),
            "version": opt_text(item, "/status/lastAttemptedRevision"),
            "suspended": item.pointer("/spec/suspend").and_then(Value::as_bool).unwrap_or(false),
        }),
        AppKind::Application => json!({
            "sync": opt_text(item, "/status/sync/status"),
            "health": opt_text(item, "/status/health/status"),
            "revision": opt_text(item, "/status/sync/revision"),
            "repo": opt_text(item, "/spec/source/repoURL"),
            "destination": opt_text(item, "/spec/destination/namespace"),
        }),
    };
    if let (Some(summary), Value::Object(details)) = (summary.as_object_mut(), details) {
        summary.extend(details);
    }
    summary
}

impl Toolset for GitopsToolset {
    fn name(&self) -> &str {
        "gitops"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "gitops.applications_list",
                "List Flux Kustomizations and HelmReleases and Argo CD Applications with their sync state",
                applications_list,
            )
            .gated_on(
                "GitOps",
                vec![
                    kinds::flux_kustomization(),
                    kinds::flux_helm_release(),
                    kinds::argo_application(),
                ],
            ),
            ToolDescriptor::new(
                "gitops.reconcile",
                "Ask Flux to reconcile a Kustomization or HelmRelease now",
                reconcile,
            )
            .write()
            .gated_on(
                "Flux",
                vec![kinds::flux_kustomization(), kinds::flux_helm_release()],
            ),
        ]
    }
}
