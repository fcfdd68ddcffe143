//! `autoscaling` toolset: HorizontalPodAutoscalers.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{condition, condition_status, conditions, int, json, opt_text, text, ToolsetDeps};
use crate::kube::{list_items, Gvr, ListOptions, NameRule};
use crate::mcp::{AccessRule, ToolArgs, ToolContext, ToolDescriptor, ToolResult};
use crate::registry::Toolset;

pub struct AutoscalingToolset {
    enabled: bool,
}

impl AutoscalingToolset {
    pub fn new(deps: &ToolsetDeps) -> Self {
        Self {
            enabled: deps.config.toolsets.autoscaling,
        }
    }
}

fn hpas() -> Gvr {
    Gvr::new("autoscaling", "v2", "horizontalpodautoscalers", true)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HpaListArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub all_namespaces: bool,
}

impl ToolArgs for HpaListArgs {
    fn context(&self) -> &str {
        &self.context
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn access(&self) -> Option<AccessRule> {
        let rule = AccessRule::new("list", "autoscaling", "horizontalpodautoscalers");
        Some(if self.all_namespaces {
            rule.cluster_scoped()
        } else {
            rule
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct HpaExplainArgs {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// HorizontalPodAutoscaler name
    pub name: String,
}

impl ToolArgs for HpaExplainArgs {
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

async fn hpa_list(ctx: ToolContext, args: HpaListArgs) -> ToolResult {
    let namespace = (!args.all_namespaces).then(|| ctx.namespace(args.namespace.as_deref()));
    let list = ctx
        .api()
        .list(&hpas(), namespace.as_deref(), &ListOptions::default())
        .await?;
    let items: Vec<Value> = list_items(&list).iter().map(summarize_hpa).collect();
    json(json!({ "namespace": namespace, "autoscalers": items }))
}

async fn hpa_explain(ctx: ToolContext, args: HpaExplainArgs) -> ToolResult {
    let namespace = ctx.namespace(args.namespace.as_deref());
    let hpa = ctx.api().get(&hpas(), Some(&namespace), &args.name).await?;

    let mut explained = summarize_hpa(&hpa);
    explained["targets"] = json!(targets(&hpa));
    explained["conditions"] = json!(conditions(&hpa));
    explained["summary"] = json!(explain(&hpa));
    json(explained)
}

fn summarize_hpa(item: &Value) -> Value {
    json!({
        "name": text(item, "/metadata/name"),
        "namespace": text(item, "/metadata/namespace"),
        "scale_target": format!(
            "{}/{}",
            text(item, "/spec/scaleTargetRef/kind"),
            text(item, "/spec/scaleTargetRef/name")
        ),
        "min_replicas": int(item, "/spec/minReplicas").unwrap_or(1),
        "max_replicas": int(item, "/spec/maxReplicas"),
        "current_replicas": int(item, "/status/currentReplicas"),
        "desired_replicas": int(item, "/status/desiredReplicas"),
        "last_scale_time": opt_text(item, "/status/lastScaleTime"),
    })
}

/// Each metric target paired with its current value, matched by metric type and name.
fn targets(item: &Value) -> Vec<Value> {
    let specs = item
        .pointer("/spec/metrics")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let current = item
        .pointer("/status/currentMetrics")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    specs
        .iter()
        .map(|spec| {
            let kind = text(spec, "/type");
            let name = metric_name(spec, &kind);
            let observed = current
                .iter()
                .find(|c| text(c, "/type") == kind && metric_name(c, &kind) == name);
            json!({
                "type": kind,
                "metric": name,
                "target": metric_value(spec, &kind, "target"),
                "current": observed.and_then(|c| metric_value(c, &kind, "current")),
            })
        })
        .collect()
}

/// `Resource` metrics are named by resource; the others by `metric.name`.
fn metric_name(metric: &Value, kind: &str) -> String {
    match kind {
        "Resource" => text(metric, "/resource/name"),
        "ContainerResource" => format!(
            "{}/{}",
            text(metric, "/containerResource/container"),
            text(metric, "/containerResource/name")
        ),
        "Pods" => text(metric, "/pods/metric/name"),
        "Object" => text(metric, "/object/metric/name"),
        "External" => text(metric, "/external/metric/name"),
        _ => String::new(),
    }
}

/// Renders `target` or `current` of a metric, e.g. `80%` or `500m`.
fn metric_value(metric: &Value, kind: &str, field: &str) -> Option<String> {
    let section = match kind {
        "Resource" => "resource",
        "ContainerResource" => "containerResource",
        "Pods" => "pods",
        "Object" => "object",
        "External" => "external",
        _ => return None,
    };
    let value = metric.get(section)?.get(field)?;
    if let Some(utilization) = value.get("averageUtilization").and_then(Value::as_i64) {
        return Some(format!("{utilization}%"));
    }
    ["averageValue", "value"]
        .iter()
        .find_map(|key| value.get(*key))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

/// One sentence on what the autoscaler is doing and why.
fn explain(item: &Value) -> String {
    let current = int(item, "/status/currentReplicas").unwrap_or(0);
    let desired = int(item, "/status/desiredReplicas").unwrap_or(current);
    let min = int(item, "/spec/minReplicas").unwrap_or(1);
    let max = int(item, "/spec/maxReplicas").unwrap_or(desired);

    if condition_status(item, "ScalingActive") == Some(false) {
        let reason = condition(item, "ScalingActive")
            .map(|c| text(c, "/reason"))
            .unwrap_or_default();
        return format!("Scaling is inactive ({reason}); replicas stay at {current}.");
    }
    if condition_status(item, "AbleToScale") == Some(false) {
        return format!("Unable to scale; {current} replicas running.");
    }
    match desired.cmp(&current) {
        std::cmp::Ordering::Greater => {
            format!("Scaling up from {current} to {desired} replicas (max {max}).")
        }
        std::cmp::Ordering::Less => {
            format!("Scaling down from {current} to {desired} replicas (min {min}).")
        }
        std::cmp::Ordering::Equal if current >= max => {
            format!("Running at the maximum of {max} replicas.")
        }
        std::cmp::Ordering::Equal => format!("Stable at {current} replicas (range {min}-{max})."),
    }
}

impl Toolset for AutoscalingToolset {
    fn name(&self) -> &str {
        "autoscaling"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "autoscaling.hpa_list",
                "List HorizontalPodAutoscalers with current and desired replicas",
                hpa_list,
            ),
            ToolDescriptor::new(
                "autoscaling.hpa_explain",
                "Explain one HorizontalPodAutoscaler: metric targets against current values, replica bounds and conditions",
                hpa_explain,
            )
            .requires("get", "autoscaling", "horizontalpodautoscalers"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hpa() -> Value {
        json!({
            "metadata": {"name": "web", "namespace": "shop"},
            "spec": {
                "scaleTargetRef": {"kind": "Deployment", "name": "web"},
                "minReplicas": 2,
                "maxReplicas": 10,
                "metrics": [
                    {"type": "Resource", "resource": {"name": "cpu", "target": {"type": "Utilization", "averageUtilization": 70}}},
                    {"type": "Pods", "pods": {"metric": {"name": "rps"}, "target": {"type": "AverageValue", "averageValue": "100"}}}
                ]
            },
            "status": {
                "currentReplicas": 3,
                "desiredReplicas": 5,
                "currentMetrics": [
                    {"type": "Resource", "resource": {"name": "cpu", "current": {"averageUtilization": 91, "averageValue": "455m"}}}
                ],
                "conditions": [
                    {"type": "AbleToScale", "status": "True", "reason": "SucceededRescale"},
                    {"type": "ScalingActive", "status": "True", "reason": "ValidMetricFound"}
                ]
            }
        })
    }

    #[test]
    fn targets_pair_spec_with_status() {
        let targets = targets(&hpa());
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0]["metric"], "cpu");
        assert_eq!(targets[0]["target"], "70%");
        assert_eq!(targets[0]["current"], "91%");
        assert_eq!(targets[1]["metric"], "rps");
        assert_eq!(targets[1]["target"], "100");
        assert!(targets[1]["current"].is_null());
    }

    #[test]
    fn explains_scale_up() {
        assert_eq!(explain(&hpa()), "Scaling up from 3 to 5 replicas (max 10).");
    }

    #[test]
    fn explains_inactive_scaling() {
        let mut item = hpa();
        item["status"]["conditions"][1] =
            json!({"type": "ScalingActive", "status": "False", "reason": "FailedGetResourceMetric"});
        assert_eq!(
            explain(&item),
            "Scaling is inactive (FailedGetResourceMetric); replicas stay at 3."
        );
    }

    #[test]
    fn summary_reads_bounds() {
        let summary = summarize_hpa(&hpa());
        assert_eq!(summary["scale_target"], "Deployment/web");
        assert_eq!(summary["min_replicas"], 2);
        assert_eq!(summary["desired_replicas"], 5);
    }
}
