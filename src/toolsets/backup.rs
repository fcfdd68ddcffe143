//! `backup` toolset: Velero backups, restores and schedules.

use std::collections::BTreeMap;

use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{int, json, kinds, opt_text, text, ToolsetDeps};
use crate::kube::{list_items, Gvk, ListOptions, NameRule};
use crate::mcp::{ToolArgs, ToolContext, ToolDescriptor, ToolResult};
use crate::registry::Toolset;

const VELERO_GROUP: &str = "velero.io";
const FEATURE: &str = "Velero";

pub struct BackupToolset {
    enabled: bool,
    has_schedule: bool,
}

impl BackupToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        let catalog = &deps.catalog;
        Self {
            enabled: deps.config.toolsets.backup && catalog.contains(&kinds::velero_backup()),
            has_schedule: catalog.contains(&kinds::velero_schedule()),
        }
    }
}

fn velero_namespace() -> String {
    "velero".to_string()
}

// ============================================================
// Arguments
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VeleroListArgs {
    #[serde(default)]
    pub context: String,
    /// Namespace Velero runs in
    #[serde(default = "velero_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub label_selector: Option<String>,
}

impl ToolArgs for VeleroListArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupCreateArgs {
    #[serde(default)]
    pub context: String,
    /// Namespace Velero runs in
    #[serde(default = "velero_namespace")]
    pub namespace: String,
    /// Backup name; generated from the current time when omitted
    #[serde(default)]
    pub name: Option<String>,
    /// Namespaces to include; all namespaces when empty
    #[serde(default)]
    pub included_namespaces: Vec<String>,
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
    /// Retention, e.g. "720h0m0s"
    #[serde(default)]
    pub ttl: Option<String>,
    #[serde(default)]
    pub storage_location: Option<String>,
    #[serde(default)]
    pub snapshot_volumes: Option<bool>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Validate without creating
    #[serde(default)]
    pub dry_run: bool,
    /// Must be true to create the backup
    #[serde(default)]
    pub confirm: bool,
}

impl ToolArgs for BackupCreateArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    fn confirm(&self) -> bool {
        self.confirm
    }

    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        self.name
            .iter()
            .map(|name| ("name", NameRule::Subdomain, name.as_str()))
            .collect()
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BackupDeleteArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default = "velero_namespace")]
    pub namespace: String,
    /// Backup to delete, including its stored data
    pub name: String,
    #[serde(default)]
    pub dry_run: bool,
    /// Must be true to delete the backup
    #[serde(default)]
    pub confirm: bool,
}

impl ToolArgs for BackupDeleteArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    fn confirm(&self) -> bool {
        self.confirm
    }

    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        vec![("name", NameRule::Subdomain, &self.name)]
    }
}

// ============================================================
// Handlers
// ============================================================

async fn list_kind(
    ctx: &ToolContext,
    gvk: Gvk,
    args: &VeleroListArgs,
    summarize: fn(&Value) -> Value,
) -> Result<Vec<Value>, crate::mcp::ToolError> {
    let gvr = ctx.resolve(FEATURE, &gvk)?;
    let options = ListOptions {
        label_selector: args.label_selector.clone(),
        limit: None,
    };
    let list = ctx.api().list(&gvr, Some(&args.namespace), &options).await?;
    Ok(list_items(&list).iter().map(summarize).collect())
}

async fn backups_list(ctx: ToolContext, args: VeleroListArgs) -> ToolResult {
    let backups = list_kind(&ctx, kinds::velero_backup(), &args, summarize_backup).await?;
    json(json!({ "namespace": args.namespace, "backups": backups }))
}

async fn restores_list(ctx: ToolContext, args: VeleroListArgs) -> ToolResult {
    let restores = list_kind(&ctx, kinds::velero_restore(), &args, summarize_restore).await?;
    json(json!({ "namespace": args.namespace, "restores": restores }))
}

async fn schedules_list(ctx: ToolContext, args: VeleroListArgs) -> ToolResult {
    let schedules = list_kind(&ctx, kinds::velero_schedule(), &args, summarize_schedule).await?;
    json(json!({ "namespace": args.namespace, "schedules": schedules }))
}

async fn backup_create(ctx: ToolContext, args: BackupCreateArgs) -> ToolResult {
    let gvr = ctx.resolve(FEATURE, &kinds::velero_backup())?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| format!("backup-{}", Utc::now().format("%Y%m%d%H%M%S")));
    let body = backup_manifest(&name, &args);
    let created = ctx
        .api()
        .create(&gvr, Some(&args.namespace), body, args.dry_run)
        .await?;
    tracing::info!(cluster = ctx.cluster(), backup = %name, dry_run = args.dry_run, "created Velero backup");
    json(json!({
        "backup": summarize_backup(&created),
        "dry_run": args.dry_run,
    }))
}

/// Velero deletes a backup and its stored data through a `DeleteBackupRequest`;
/// deleting the `Backup` object alone leaves the data behind.
async fn backup_delete(ctx: ToolContext, args: BackupDeleteArgs) -> ToolResult {
    let gvr = ctx.resolve(FEATURE, &kinds::velero_delete_request())?;
    let body = json!({
        "apiVersion": gvr.api_version(),
        "kind": "DeleteBackupRequest",
        "metadata": {
            "generateName": format!("{}-", args.name),
            "namespace": args.namespace,
            "labels": { "velero.io/backup-name": args.name },
        },
        "spec": { "backupName": args.name },
    });
    let created = ctx
        .api()
        .create(&gvr, Some(&args.namespace), body, args.dry_run)
        .await?;
    tracing::info!(cluster = ctx.cluster(), backup = %args.name, dry_run = args.dry_run, "requested Velero backup deletion");
    json(json!({
        "backup": args.name,
        "request": text(&created, "/metadata/name"),
        "dry_run": args.dry_run,
    }))
}

fn backup_manifest(name: &str, args: &BackupCreateArgs) -> Value {
    let mut spec = json!({});
    if !args.included_namespaces.is_empty() {
        spec["includedNamespaces"] = json!(args.included_namespaces);
    }
    if !args.excluded_namespaces.is_empty() {
        spec["excludedNamespaces"] = json!(args.excluded_namespaces);
    }
    if let Some(ttl) = &args.ttl {
        spec["ttl"] = json!(ttl);
    }
    if let Some(location) = &args.storage_location {
        spec["storageLocation"] = json!(location);
    }
    if let Some(snapshot) = args.snapshot_volumes {
        spec["snapshotVolumes"] = json!(snapshot);
    }
    json!({
        "apiVersion": format!("{}/v1", VELERO_GROUP),
        "kind": "Backup",
        "metadata": {
            "name": name,
            "namespace": args.namespace,
            "labels": args.labels,
        },
        "spec": spec,
    })
}

// ============================================================
// Normalizers
// ============================================================

fn summarize_backup(item: &Value) -> Value {
    json!({
        "name": text(item, "/metadata/name"),
        "phase": text(item, "/status/phase"),
        "included_namespaces": item.pointer("/spec/includedNamespaces").cloned().unwrap_or_else(|| json!(["*"])),
        "storage_location": text(item, "/spec/storageLocation"),
        "started": opt_text(item, "/status/startTimestamp"),
        "completed": opt_text(item, "/status/completionTimestamp"),
        "expires": opt_text(item, "/status/expiration"),
        "items_backed_up": int(item, "/status/progress/itemsBackedUp"),
        "errors": int(item, "/status/errors").unwrap_or(0),
        "warnings": int(item, "/status/warnings").unwrap_or(0),
    })
}

fn summarize_restore(item: &Value) -> Value {
    json!({
        "name": text(item, "/metadata/name"),
        "backup": text(item, "/spec/backupName"),
        "schedule": opt_text(item, "/spec/scheduleName"),
        "phase": text(item, "/status/phase"),
        "started": opt_text(item, "/status/startTimestamp"),
        "completed": opt_text(item, "/status/completionTimestamp"),
        "errors": int(item, "/status/errors").unwrap_or(0),
        "warnings": int(item, "/status/warnings").unwrap_or(0),
    })
}

fn summarize_schedule(item: &Value) -> Value {
    json!({
        "name": text(item, "/metadata/name"),
        "schedule": text(item, "/spec/schedule"),
        "paused": item.pointer("/spec/paused").and_then(Value::as_bool).unwrap_or(false),
        "phase": text(item, "/status/phase"),
        "last_backup": opt_text(item, "/status/lastBackup"),
        "ttl": opt_text(item, "/spec/template/ttl"),
    })
}

// ============================================================
// Registration
// ============================================================

impl Toolset for BackupToolset {
    fn name(&self) -> &str {
        "backup"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools = vec![
            ToolDescriptor::new("backup.backups_list", "List Velero backups with phase and progress", backups_list)
                .requires("list", VELERO_GROUP, "backups")
                .gated_on(FEATURE, vec![kinds::velero_backup()]),
            ToolDescriptor::new(
                "backup.backup_create",
                "Create a Velero backup. Requires confirm=true; supports dry_run",
                backup_create,
            )
            .destructive()
            .requires("create", VELERO_GROUP, "backups")
            .gated_on(FEATURE, vec![kinds::velero_backup()]),
            ToolDescriptor::new(
                "backup.backup_delete",
                "Delete a Velero backup and its stored data. Requires confirm=true",
                backup_delete,
            )
            .destructive()
            .requires("create", VELERO_GROUP, "deletebackuprequests")
            .gated_on(FEATURE, vec![kinds::velero_delete_request()]),
            ToolDescriptor::new("backup.restores_list", "List Velero restores", restores_list)
                .requires("list", VELERO_GROUP, "restores")
                .gated_on("Velero restores", vec![kinds::velero_restore()]),
        ];
        if self.has_schedule {
            tools.push(
                ToolDescriptor::new("backup.schedules_list", "List Velero backup schedules", schedules_list)
                    .requires("list", VELERO_GROUP, "schedules")
                    .gated_on("Velero schedules", vec![kinds::velero_schedule()]),
            );
        }
        tools
    }
}
