//! Shared fakes for the integration specs.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use kubemcp::app::App;
use kubemcp::config::Config;
use kubemcp::kube::{
    ApiGroupInfo, ApiResourceInfo, ClusterApi, ClusterConnection, ClusterConnector, CrdInfo, Gvr,
    KubeError, ListOptions, LogOptions, ResourceAttributes, SharedRateLimiter, TokenReviewStatus,
};

/// A mutation the fake observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub verb: &'static str,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub body: Option<Value>,
    pub dry_run: bool,
}

/// Counts the lists that were started but never finished.
struct ListGuard<'a> {
    abandoned: &'a AtomicUsize,
    finished: bool,
}

impl Drop for ListGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// In-memory cluster recording every mutation and self-permission query.
#[derive(Default)]
pub struct FakeCluster {
    crds: Mutex<Vec<CrdInfo>>,
    aggregated: Mutex<Vec<(ApiGroupInfo, Vec<ApiResourceInfo>)>>,
    items: Mutex<HashMap<String, Vec<Value>>>,
    denied: Mutex<HashSet<(String, String, String)>>,
    tokens: Mutex<HashMap<String, String>>,
    mutations: Mutex<Vec<Mutation>>,
    ssar_calls: AtomicUsize,
    crd_lists: AtomicUsize,
    block_lists: AtomicBool,
    abandoned_lists: AtomicUsize,
    fail_discovery: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn install_crd(&self, group: &str, version: &str, kind: &str, plural: &str) {
        self.crds.lock().unwrap().push(CrdInfo {
            group: group.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced: true,
            served_versions: vec![version.to_string()],
        });
    }

    /// Velero's backup kinds, without `Restore`.
    pub fn install_velero(&self) {
        self.install_crd("velero.io", "v1", "Backup", "backups");
        self.install_crd("velero.io", "v1", "DeleteBackupRequest", "deletebackuprequests");
    }

    pub fn install_velero_restores(&self) {
        self.install_crd("velero.io", "v1", "Restore", "restores");
    }

    pub fn install_metrics_api(&self) {
        self.aggregated.lock().unwrap().push((
            ApiGroupInfo {
                name: "metrics.k8s.io".into(),
                preferred_version: "v1beta1".into(),
            },
            vec![
                ApiResourceInfo {
                    name: "pods".into(),
                    kind: "PodMetrics".into(),
                    namespaced: true,
                },
                ApiResourceInfo {
                    name: "nodes".into(),
                    kind: "NodeMetrics".into(),
                    namespaced: false,
                },
            ],
        ));
    }

    pub fn remove_crds(&self) {
        self.crds.lock().unwrap().clear();
    }

    pub fn set_items(&self, resource: &str, items: Vec<Value>) {
        self.items
            .lock()
            .unwrap()
            .insert(resource.to_string(), items);
    }

    /// Self-permission queries for `verb` on `group/resource` answer `false`.
    pub fn deny(&self, verb: &str, group: &str, resource: &str) {
        self.denied
            .lock()
            .unwrap()
            .insert((verb.into(), group.into(), resource.into()));
    }

    pub fn accept_token(&self, token: &str, username: &str) {
        self.tokens
            .lock()
            .unwrap()
            .insert(token.into(), username.into());
    }

    /// Every list from now on hangs until its caller gives up.
    pub fn block_lists(&self) {
        self.block_lists.store(true, Ordering::SeqCst);
    }

    pub fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn ssar_calls(&self) -> usize {
        self.ssar_calls.load(Ordering::SeqCst)
    }

    pub fn crd_lists(&self) -> usize {
        self.crd_lists.load(Ordering::SeqCst)
    }

    pub fn abandoned_lists(&self) -> usize {
        self.abandoned_lists.load(Ordering::SeqCst)
    }

    fn record(&self, mutation: Mutation) {
        self.mutations.lock().unwrap().push(mutation);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_crds(&self) -> Result<Vec<CrdInfo>, KubeError> {
        self.crd_lists.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(KubeError::api(503, "ServiceUnavailable", "apiserver is starting"));
        }
        Ok(self.crds.lock().unwrap().clone())
    }

    async fn server_groups(&self) -> Result<Vec<ApiGroupInfo>, KubeError> {
        Ok(self
            .aggregated
            .lock()
            .unwrap()
            .iter()
            .map(|(group, _)| group.clone())
            .collect())
    }

    async fn group_resources(&self, group_version: &str) -> Result<Vec<ApiResourceInfo>, KubeError> {
        self.aggregated
            .lock()
            .unwrap()
            .iter()
            .find(|(group, _)| format!("{}/{}", group.name, group.preferred_version) == group_version)
            .map(|(_, resources)| resources.clone())
            .ok_or_else(|| KubeError::api(404, "NotFound", "group not served"))
    }

    async fn list(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Value, KubeError> {
        let mut guard = ListGuard {
            abandoned: &self.abandoned_lists,
            finished: false,
        };
        if self.block_lists.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        guard.finished = true;

        let items: Vec<Value> = self
            .items
            .lock()
            .unwrap()
            .get(&gvr.resource)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| match namespace {
                Some(ns) => item.pointer("/metadata/namespace").and_then(Value::as_str) == Some(ns),
                None => true,
            })
            .filter(|item| match &options.label_selector {
                Some(selector) => matches_selector(item, selector),
                None => true,
            })
            .collect();
        Ok(json!({ "items": items }))
    }

    async fn get(&self, gvr: &Gvr, namespace: Option<&str>, name: &str) -> Result<Value, KubeError> {
        self.items
            .lock()
            .unwrap()
            .get(&gvr.resource)
            .and_then(|items| {
                items
                    .iter()
                    .find(|item| {
                        item.pointer("/metadata/name").and_then(Value::as_str) == Some(name)
                            && item.pointer("/metadata/namespace").and_then(Value::as_str) == namespace
                    })
                    .cloned()
            })
            .ok_or_else(|| {
                KubeError::api(404, "NotFound", format!("{} \"{}\" not found", gvr.resource, name))
            })
    }

    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        body: Value,
        dry_run: bool,
    ) -> Result<Value, KubeError> {
        self.record(Mutation {
            verb: "create",
            resource: gvr.resource.clone(),
            namespace: namespace.map(str::to_string),
            name: body.pointer("/metadata/name").and_then(Value::as_str).map(str::to_string),
            body: Some(body.clone()),
            dry_run,
        });
        let mut created = body;
        if created.pointer("/metadata/name").is_none() {
            let prefix = created
                .pointer("/metadata/generateName")
                .and_then(Value::as_str)
                .unwrap_or("object-")
                .to_string();
            created["metadata"]["name"] = json!(format!("{prefix}x7k2p"));
        }
        Ok(created)
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        dry_run: bool,
    ) -> Result<Value, KubeError> {
        self.record(Mutation {
            verb: "delete",
            resource: gvr.resource.clone(),
            namespace: namespace.map(str::to_string),
            name: Some(name.to_string()),
            body: None,
            dry_run,
        });
        Ok(json!({ "kind": "Status", "status": "Success" }))
    }

    async fn merge_patch(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
        dry_run: bool,
    ) -> Result<Value, KubeError> {
        self.record(Mutation {
            verb: "patch",
            resource: gvr.resource.clone(),
            namespace: namespace.map(str::to_string),
            name: Some(name.to_string()),
            body: Some(patch.clone()),
            dry_run,
        });
        Ok(patch)
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        pod: &str,
        _options: &LogOptions,
    ) -> Result<String, KubeError> {
        Ok(format!("{pod} started\n{pod} ready\n"))
    }

    async fn self_access_review(
        &self,
        attributes: &ResourceAttributes,
        _bearer: Option<&str>,
    ) -> Result<bool, KubeError> {
        self.ssar_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let resource = match &attributes.subresource {
            Some(subresource) => format!("{}/{}", attributes.resource, subresource),
            None => attributes.resource.clone(),
        };
        let key = (attributes.verb.clone(), attributes.group.clone(), resource);
        Ok(!self.denied.lock().unwrap().contains(&key))
    }

    async fn token_review(&self, token: &str) -> Result<TokenReviewStatus, KubeError> {
        Ok(match self.tokens.lock().unwrap().get(token) {
            Some(username) => TokenReviewStatus {
                authenticated: true,
                username: Some(username.clone()),
                error: None,
            },
            None => TokenReviewStatus {
                authenticated: false,
                username: None,
                error: Some("invalid bearer token".into()),
            },
        })
    }
}

/// Equality-only selectors: `a=b,c=d`.
fn matches_selector(item: &Value, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((key, value)) => {
            item.pointer(&format!("/metadata/labels/{key}"))
                .and_then(Value::as_str)
                == Some(value)
        }
        None => true,
    })
}

/// Connects every context name in `clusters` to its fake.
pub struct FakeConnector {
    pub default_context: String,
    pub clusters: HashMap<String, Arc<FakeCluster>>,
}

impl FakeConnector {
    pub fn single(cluster: Arc<FakeCluster>) -> Arc<Self> {
        Arc::new(Self {
            default_context: "test".into(),
            clusters: HashMap::from([("test".to_string(), cluster)]),
        })
    }
}

impl ClusterConnector for FakeConnector {
    fn contexts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clusters.keys().cloned().collect();
        names.sort();
        names
    }

    fn current_context(&self) -> String {
        self.default_context.clone()
    }

    fn connect(&self, context: &str) -> Result<ClusterConnection, KubeError> {
        let cluster = self
            .clusters
            .get(context)
            .ok_or_else(|| KubeError::Config(format!("context \"{context}\" not found")))?;
        Ok(ClusterConnection {
            api: Arc::clone(cluster) as Arc<dyn ClusterApi>,
            default_namespace: "default".into(),
        })
    }
}

pub async fn build_app(cluster: Arc<FakeCluster>, config: Config) -> App {
    App::build(config, FakeConnector::single(cluster), SharedRateLimiter::new(1000.0, 1000))
        .await
        .expect("Failed to build app")
}

/// The structured error payload of a failed tool result.
pub fn error_payload(result: &rmcp::model::CallToolResult) -> Value {
    assert_eq!(result.is_error, Some(true), "expected an error result: {result:?}");
    let text = result.content[0]
        .as_text()
        .expect("error content should be text")
        .text
        .clone();
    serde_json::from_str(&text).expect("error payload should be JSON")
}

/// The JSON body of a successful tool result.
pub fn success_payload(result: &rmcp::model::CallToolResult) -> Value {
    assert_ne!(result.is_error, Some(true), "expected success: {result:?}");
    let text = result.content[0]
        .as_text()
        .expect("result content should be text")
        .text
        .clone();
    serde_json::from_str(&text).expect("result should be JSON")
}
