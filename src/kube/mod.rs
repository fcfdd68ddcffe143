//! Kubernetes API access: the [`ClusterApi`] seam, its REST implementation, kubeconfig
//! resolution and the per-context [`ClientProvider`].

mod client;
mod error;
pub mod kubeconfig;
mod names;
mod provider;
mod rate_limit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::HttpCluster;
pub use error::KubeError;
pub use kubeconfig::{ConnectionSettings, Kubeconfig};
pub use names::NameRule;
pub use provider::{
    ClientBundle, ClientProvider, ClusterConnection, ClusterConnector, KubeconfigConnector,
};
pub use rate_limit::SharedRateLimiter;

/// `(group, version, kind)` identifier of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }
}

impl std::fmt::Display for Gvk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// `(group, version, resource)` under which the API server serves a kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespaced: bool,
}

impl Gvr {
    pub fn new(group: &str, version: &str, resource: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            namespaced,
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// REST path of the collection, scoped to `namespace` when the resource is namespaced.
    pub fn collection_path(&self, namespace: Option<&str>) -> String {
        let root = if self.group.is_empty() {
            format!("/api/{}", names::segment(&self.version))
        } else {
            format!(
                "/apis/{}/{}",
                names::segment(&self.group),
                names::segment(&self.version)
            )
        };
        let resource = names::segment(&self.resource);
        match namespace {
            Some(ns) if self.namespaced && !ns.is_empty() => {
                format!("{}/namespaces/{}/{}", root, names::segment(ns), resource)
            }
            _ => format!("{}/{}", root, resource),
        }
    }

    pub fn item_path(&self, namespace: Option<&str>, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), names::segment(name))
    }
}

/// One custom resource definition as reported by `apiextensions.k8s.io`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrdInfo {
    pub group: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
    pub served_versions: Vec<String>,
}

/// An API group from the discovery index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiGroupInfo {
    pub name: String,
    pub preferred_version: String,
}

/// A resource within one group-version from discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResourceInfo {
    pub name: String,
    pub kind: String,
    pub namespaced: bool,
}

/// Attributes of a self-permission question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAttributes {
    pub verb: String,
    pub group: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subresource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Outcome of a TokenReview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenReviewStatus {
    pub authenticated: bool,
    pub username: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub container: Option<String>,
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
}

/// Everything the server needs from a cluster. Implemented over REST by
/// [`HttpCluster`]; tests provide recording fakes.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_crds(&self) -> Result<Vec<CrdInfo>, KubeError>;

    async fn server_groups(&self) -> Result<Vec<ApiGroupInfo>, KubeError>;

    async fn group_resources(&self, group_version: &str)
        -> Result<Vec<ApiResourceInfo>, KubeError>;

    async fn list(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Value, KubeError>;

    async fn get(&self, gvr: &Gvr, namespace: Option<&str>, name: &str)
        -> Result<Value, KubeError>;

    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        body: Value,
        dry_run: bool,
    ) -> Result<Value, KubeError>;

    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        dry_run: bool,
    ) -> Result<Value, KubeError>;

    async fn merge_patch(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
        dry_run: bool,
    ) -> Result<Value, KubeError>;

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<String, KubeError>;

    /// `SelfSubjectAccessReview`. With `bearer` set, the question is asked as that caller.
    async fn self_access_review(
        &self,
        attributes: &ResourceAttributes,
        bearer: Option<&str>,
    ) -> Result<bool, KubeError>;

    async fn token_review(&self, token: &str) -> Result<TokenReviewStatus, KubeError>;
}

/// Items of a list response, or an empty slice.
pub fn list_items(list: &Value) -> &[Value] {
    list.get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn core_group_paths_use_api_prefix() {
        let pods = Gvr::new("", "v1", "pods", true);
        assert_eq!(pods.collection_path(Some("web")), "/api/v1/namespaces/web/pods");
        assert_eq!(pods.collection_path(None), "/api/v1/pods");
        assert_eq!(pods.api_version(), "v1");
    }

    #[test]
    fn named_group_paths_use_apis_prefix() {
        let backups = Gvr::new("velero.io", "v1", "backups", true);
        assert_eq!(
            backups.item_path(Some("velero"), "nightly"),
            "/apis/velero.io/v1/namespaces/velero/backups/nightly"
        );
        assert_eq!(backups.api_version(), "velero.io/v1");
    }

    #[test]
    fn cluster_scoped_paths_ignore_namespace() {
        let namespaces = Gvr::new("", "v1", "namespaces", false);
        assert_eq!(namespaces.collection_path(Some("ignored")), "/api/v1/namespaces");
    }

    #[test]
    fn names_stay_within_one_path_segment() {
        let configmaps = Gvr::new("", "v1", "configmaps", true);
        assert_eq!(
            configmaps.item_path(Some("web"), "x/../../secrets/admin"),
            "/api/v1/namespaces/web/configmaps/x%2F..%2F..%2Fsecrets%2Fadmin"
        );
        assert_eq!(
            configmaps.item_path(Some("a/b"), "system:admin"),
            "/api/v1/namespaces/a%2Fb/configmaps/system%3Aadmin"
        );
    }

    #[test]
    fn list_items_tolerates_missing_items() {
        assert!(list_items(&json!({})).is_empty());
        assert_eq!(list_items(&json!({"items": [1, 2]})).len(), 2);
    }
}
