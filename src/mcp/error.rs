use std::time::Duration;

use rmcp::model::{CallToolResult, Content};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::kube::{KubeError, ResourceAttributes};

/// Failure of a single tool invocation. Always reported to the caller as a tool result
/// with `is_error` set, never as a protocol error.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    #[error("invalid arguments: {message}")]
    BadArgument { message: String },

    #[error("'{tool}' is destructive; call it again with confirm=true to proceed")]
    ConfirmationRequired { tool: String },

    #[error("{} on {} is forbidden", .attributes.verb, describe_resource(.attributes))]
    Forbidden { attributes: ResourceAttributes },

    #[error("{feature} is not installed on this cluster (missing {missing})")]
    FeatureNotInstalled { feature: String, missing: String },

    #[error("{message}")]
    FeatureDisabled { message: String },

    #[error("kubernetes API error: {message}")]
    Kubernetes {
        code: Option<u16>,
        reason: String,
        message: String,
    },

    #[error("external service unavailable: {message}")]
    ExternalServiceUnavailable { service: String, message: String },

    #[error("the metrics API (metrics.k8s.io) is not available: {message}")]
    MetricsUnavailable { message: String },

    #[error("request was cancelled")]
    Cancelled,

    #[error("request exceeded its deadline of {}", crate::config::duration::format(*.timeout))]
    DeadlineExceeded { timeout: Duration },

    #[error("internal error: {message}")]
    Internal { message: String },
}

fn describe_resource(attributes: &ResourceAttributes) -> String {
    let mut resource = if attributes.group.is_empty() {
        attributes.resource.clone()
    } else {
        format!("{}.{}", attributes.resource, attributes.group)
    };
    if let Some(subresource) = &attributes.subresource {
        resource = format!("{}/{}", resource, subresource);
    }
    match attributes.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{} in namespace {}", resource, ns),
        _ => resource,
    }
}

impl ToolError {
    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self::BadArgument {
            message: message.into(),
        }
    }

    pub fn feature_disabled(message: impl Into<String>) -> Self {
        Self::FeatureDisabled {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable name of the error kind, used as `error.type` and as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool { .. } => "UnknownTool",
            ToolError::BadArgument { .. } => "BadArgument",
            ToolError::ConfirmationRequired { .. } => "ConfirmationRequired",
            ToolError::Forbidden { .. } => "Forbidden",
            ToolError::FeatureNotInstalled { .. } => "FeatureNotInstalled",
            ToolError::FeatureDisabled { .. } => "FeatureDisabled",
            ToolError::Kubernetes { .. } => "KubernetesError",
            ToolError::ExternalServiceUnavailable { .. } => "ExternalServiceUnavailable",
            ToolError::MetricsUnavailable { .. } => "MetricsUnavailable",
            ToolError::Cancelled => "Cancelled",
            ToolError::DeadlineExceeded { .. } => "DeadlineExceeded",
            ToolError::Internal { .. } => "Internal",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ToolError::UnknownTool { name } => Some(json!({ "name": name })),
            ToolError::ConfirmationRequired { tool } => {
                Some(json!({ "tool": tool, "parameter": "confirm" }))
            }
            ToolError::Forbidden { attributes } => {
                let mut details = json!({
                    "verb": attributes.verb,
                    "group": attributes.group,
                    "resource": attributes.resource,
                    "namespace": attributes.namespace.clone().unwrap_or_default(),
                });
                if let Some(subresource) = &attributes.subresource {
                    details["subresource"] = json!(subresource);
                }
                Some(details)
            }
            ToolError::FeatureNotInstalled { feature, missing } => {
                Some(json!({ "feature": feature, "missing": missing }))
            }
            ToolError::Kubernetes {
                code,
                reason,
                message,
            } => Some(json!({ "code": code, "reason": reason, "message": message })),
            ToolError::ExternalServiceUnavailable { service, .. } => {
                Some(json!({ "service": service }))
            }
            ToolError::DeadlineExceeded { timeout } => {
                Some(json!({ "timeout_ms": timeout.as_millis() as u64 }))
            }
            _ => None,
        }
    }

    /// `{"error":{"type","message","details"?}}`
    pub fn payload(&self) -> Value {
        let mut error = Map::new();
        error.insert("type".into(), Value::String(self.kind().to_string()));
        error.insert("message".into(), Value::String(self.to_string()));
        if let Some(details) = self.details() {
            error.insert("details".into(), details);
        }
        json!({ "error": error })
    }

    pub fn into_result(self) -> CallToolResult {
        CallToolResult::error(vec![Content::text(self.payload().to_string())])
    }

    /// Map a cluster error raised while serving `group`. A 404 from the metrics API
    /// means it is not served.
    pub fn from_kube(error: KubeError, group: &str) -> Self {
        match error {
            e if group == "metrics.k8s.io" && e.is_not_found() => ToolError::MetricsUnavailable {
                message: e.to_string(),
            },
            KubeError::Api {
                code,
                reason,
                message,
            } => ToolError::Kubernetes {
                code: Some(code),
                reason,
                message,
            },
            other => ToolError::Kubernetes {
                code: other.status_code(),
                reason: String::new(),
                message: other.to_string(),
            },
        }
    }
}

impl From<KubeError> for ToolError {
    fn from(error: KubeError) -> Self {
        ToolError::from_kube(error, "")
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(error: serde_json::Error) -> Self {
        ToolError::internal(format!("failed to encode result: {}", error))
    }
}
