//! `certificates` toolset: cert-manager certificates.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{condition, condition_status, conditions, json, kinds, opt_text, text, ToolsetDeps};
use crate::kube::{list_items, ListOptions, NameRule};
use crate::mcp::{AccessRule, ToolArgs, ToolContext, ToolDescriptor, ToolResult};
use crate::registry::Toolset;

const FEATURE: &str = "cert-manager";
const CERT_MANAGER_GROUP: &str = "cert-manager.io";

pub struct CertificatesToolset {
    enabled: bool,
}

impl CertificatesToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        Self {
            enabled: deps.config.toolsets.certificates
                && deps.catalog.contains(&kinds::certificate()),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CertificatesListArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub all_namespaces: bool,
    /// Only certificates that are not Ready
    #[serde(default)]
    pub not_ready_only: bool,
}

impl ToolArgs for CertificatesListArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        let rule = AccessRule::new("list", CERT_MANAGER_GROUP, "certificates");
        Some(if self.all_namespaces {
            rule.cluster_scoped()
        } else {
            rule
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CertificateGetArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Certificate name
    pub name: String,
}

impl ToolArgs for CertificateGetArgs {
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

async fn certificates_list(ctx: ToolContext, args: CertificatesListArgs) -> ToolResult {
    let gvr = ctx.resolve(FEATURE, &kinds::certificate())?;
    let namespace = (!args.all_namespaces).then(|| ctx.namespace(args.namespace.as_deref()));
    let list = ctx
        .api()
        .list(&gvr, namespace.as_deref(), &ListOptions::default())
        .await?;
    let now = Utc::now();
    let certificates: Vec<Value> = list_items(&list)
        .iter()
        .filter(|item| !args.not_ready_only || condition_status(item, "Ready") != Some(true))
        .map(|item| summarize(item, now))
        .collect();
    json(json!({ "namespace": namespace, "certificates": certificates }))
}

async fn certificate_get(ctx: ToolContext, args: CertificateGetArgs) -> ToolResult {
    let gvr = ctx.resolve(FEATURE, &kinds::certificate())?;
    let namespace = ctx.namespace(args.namespace.as_deref());
    let certificate = ctx.api().get(&gvr, Some(&namespace), &args.name).await?;

    let mut detail = summarize(&certificate, Utc::now());
    detail["secret"] = json!(text(&certificate, "/spec/secretName"));
    detail["duration"] = json!(opt_text(&certificate, "/spec/duration"));
    detail["renew_before"] = json!(opt_text(&certificate, "/spec/renewBefore"));
    detail["not_before"] = json!(opt_text(&certificate, "/status/notBefore"));
    detail["revision"] = json!(certificate.pointer("/status/revision").and_then(Value::as_i64));
    detail["conditions"] = json!(conditions(&certificate));
    json(detail)
}

fn summarize(item: &Value, now: DateTime<Utc>) -> Value {
    let not_after = opt_text(item, "/status/notAfter");
    let days_left = not_after
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| (t.with_timezone(&Utc) - now).num_days());
    json!({
        "name": text(item, "/metadata/name"),
        "namespace": text(item, "/metadata/namespace"),
        "ready": condition_status(item, "Ready"),
        "reason": condition(item, "Ready").map(|c| text(c, "/reason")),
        "issuer": format!(
            "{}/{}",
            item.pointer("/spec/issuerRef/kind").and_then(Value::as_str).unwrap_or("Issuer"),
            text(item, "/spec/issuerRef/name")
        ),
        "dns_names": item.pointer("/spec/dnsNames").cloned().unwrap_or_else(|| json!([])),
        "not_after": not_after,
        "days_until_expiry": days_left,
        "renewal_time": opt_text(item, "/status/renewalTime"),
    })
}

impl Toolset for CertificatesToolset {
    fn name(&self) -> &str {
        "certificates"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "certificates.list",
                "List cert-manager certificates with readiness and expiry",
                certificates_list,
            )
            .gated_on(FEATURE, vec![kinds::certificate()]),
            ToolDescriptor::new(
                "certificates.get",
                "Show one cert-manager certificate: issuer, DNS names, expiry, renewal time and conditions",
                certificate_get,
            )
            .requires("get", CERT_MANAGER_GROUP, "certificates")
            .gated_on(FEATURE, vec![kinds::certificate()]),
        ]
    }
}
