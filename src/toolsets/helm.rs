//! `helm` toolset: releases as recorded by Helm's secret storage driver.
//!
//! Helm 3 stores each release revision in a secret of type `helm.sh/release.v1`
//! named `sh.helm.release.v1.<release>.v<revision>` and labelled with
//! `owner=helm`, `name`, `status` and `version`. Only the labels are read.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{json, text, ToolsetDeps};
use crate::kube::{list_items, Gvr, ListOptions, NameRule};
use crate::mcp::{AccessRule, ToolArgs, ToolContext, ToolDescriptor, ToolResult};
use crate::registry::Toolset;

const RELEASE_SELECTOR: &str = "owner=helm";

pub struct HelmToolset {
    enabled: bool,
    namespace: String,
    max_history: usize,
}

impl HelmToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        Self {
            enabled: deps.config.toolsets.helm,
            namespace: deps.config.helm.namespace.clone(),
            max_history: deps.config.helm.max_history as usize,
        }
    }
}

fn secrets() -> Gvr {
    Gvr::new("", "v1", "secrets", true)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReleasesListArgs {
    #[serde(default)]
    pub context: String,
    /// Namespace; the configured Helm namespace when omitted
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub all_namespaces: bool,
    /// Only this release
    #[serde(default)]
    pub name: Option<String>,
    /// Include earlier revisions of each release
    #[serde(default)]
    pub history: bool,
}

impl ToolArgs for ReleasesListArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        let rule = AccessRule::new("list", "", "secrets");
        Some(if self.all_namespaces {
            rule.cluster_scoped()
        } else {
            rule
        })
    }

    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        self.name
            .iter()
            .map(|name| ("name", NameRule::Subdomain, name.as_str()))
            .collect()
    }
}

/// One stored revision of a release.
#[derive(Debug, Clone, PartialEq)]
struct Revision {
    name: String,
    namespace: String,
    revision: u64,
    status: String,
    modified_at: Option<String>,
}

impl Revision {
    fn from_secret(secret: &Value) -> Option<Self> {
        let labels = secret.pointer("/metadata/labels")?;
        let label = |key: &str| labels.get(key).and_then(Value::as_str);
        Some(Self {
            name: label("name")?.to_string(),
            namespace: text(secret, "/metadata/namespace"),
            revision: label("version")?.parse().ok()?,
            status: label("status").unwrap_or("unknown").to_string(),
            modified_at: label("modifiedAt").map(str::to_string),
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "revision": self.revision,
            "status": self.status,
            "modified_at": self.modified_at,
        })
    }
}

/// Groups revisions by release, newest first, keeping at most `max_history`
/// earlier revisions per release.
fn releases(revisions: Vec<Revision>, max_history: usize, with_history: bool) -> Vec<Value> {
    let mut grouped: BTreeMap<(String, String), Vec<Revision>> = BTreeMap::new();
    for revision in revisions {
        grouped
            .entry((revision.namespace.clone(), revision.name.clone()))
            .or_default()
            .push(revision);
    }

    grouped
        .into_values()
        .filter_map(|mut revisions| {
            revisions.sort_by(|a, b| b.revision.cmp(&a.revision));
            let latest = revisions.first()?.clone();
            let mut release = json!({
                "name": latest.name,
                "namespace": latest.namespace,
                "revision": latest.revision,
                "status": latest.status,
                "updated": latest.modified_at,
            });
            if with_history {
                release["history"] = revisions
                    .iter()
                    .skip(1)
                    .take(max_history)
                    .map(Revision::to_json)
                    .collect();
            }
            Some(release)
        })
        .collect()
}

async fn releases_list(
    ctx: ToolContext,
    args: ReleasesListArgs,
    max_history: usize,
) -> ToolResult {
    let namespace = (!args.all_namespaces).then(|| ctx.namespace(args.namespace.as_deref()));
    let selector = match &args.name {
        Some(name) => format!("{RELEASE_SELECTOR},name={name}"),
        None => RELEASE_SELECTOR.to_string(),
    };
    let options = ListOptions {
        label_selector: Some(selector),
        limit: None,
    };
    let list = ctx.api().list(&secrets(), namespace.as_deref(), &options).await?;
    let revisions = list_items(&list)
        .iter()
        .filter_map(Revision::from_secret)
        .collect();

    json(json!({
        "namespace": namespace,
        "releases": releases(revisions, max_history, args.history),
    }))
}

impl Toolset for HelmToolset {
    fn name(&self) -> &str {
        "helm"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let max_history = self.max_history;
        vec![ToolDescriptor::new(
            "helm.releases_list",
            "List Helm releases with their latest revision and status",
            move |ctx, args: ReleasesListArgs| releases_list(ctx, args, max_history),
        )
        .default_namespace(&self.namespace)]
    }
}
