use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use super::kubeconfig::IN_CLUSTER_CONTEXT;
use super::{ClusterApi, ConnectionSettings, HttpCluster, KubeError, Kubeconfig, SharedRateLimiter};
use crate::capability::CapabilityCatalog;
use crate::config::{KubernetesConfig, ProviderKind};

/// An open connection to one context, before discovery.
pub struct ClusterConnection {
    pub api: Arc<dyn ClusterApi>,
    pub default_namespace: String,
}

/// Per-context clients and the capability catalog discovered through them. Created on
/// first use and kept for the server's lifetime.
pub struct ClientBundle {
    pub context: String,
    pub api: Arc<dyn ClusterApi>,
    pub catalog: Arc<CapabilityCatalog>,
    pub default_namespace: String,
}

impl ClientBundle {
    /// Namespace from the arguments, falling back to the context's default.
    pub fn namespace_or_default(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => self.default_namespace.clone(),
        }
    }
}

impl std::fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBundle")
            .field("context", &self.context)
            .field("default_namespace", &self.default_namespace)
            .finish_non_exhaustive()
    }
}

/// Knows which contexts exist and how to open a connection to one of them.
pub trait ClusterConnector: Send + Sync {
    fn contexts(&self) -> Vec<String>;

    fn current_context(&self) -> String;

    fn connect(&self, context: &str) -> Result<ClusterConnection, KubeError>;
}

/// Connector backed by a kubeconfig file or the in-cluster service account.
pub struct KubeconfigConnector {
    provider: ProviderKind,
    kubeconfig: Kubeconfig,
    default_context: String,
    limiter: SharedRateLimiter,
    timeout: Duration,
}

impl KubeconfigConnector {
    pub fn from_config(
        config: &KubernetesConfig,
        limiter: SharedRateLimiter,
    ) -> Result<Self, KubeError> {
        let kubeconfig = match config.provider {
            ProviderKind::InCluster => Kubeconfig::default(),
            ProviderKind::Kubeconfig => {
                let path: PathBuf = config
                    .kubeconfig
                    .clone()
                    .or_else(Kubeconfig::default_path)
                    .ok_or_else(|| KubeError::Config("no kubeconfig path available".into()))?;
                Kubeconfig::load(&path)?
            }
        };

        let default_context = match config.provider {
            ProviderKind::InCluster => IN_CLUSTER_CONTEXT.to_string(),
            ProviderKind::Kubeconfig if !config.context.is_empty() => config.context.clone(),
            ProviderKind::Kubeconfig => kubeconfig
                .current_context()
                .map(str::to_string)
                .ok_or_else(|| {
                    KubeError::Config("kubeconfig has no current-context and none was configured".into())
                })?,
        };

        Ok(Self {
            provider: config.provider,
            kubeconfig,
            default_context,
            limiter,
            timeout: config.timeout,
        })
    }
}

impl ClusterConnector for KubeconfigConnector {
    fn contexts(&self) -> Vec<String> {
        match self.provider {
            ProviderKind::InCluster => vec![IN_CLUSTER_CONTEXT.to_string()],
            ProviderKind::Kubeconfig => self.kubeconfig.context_names(),
        }
    }

    fn current_context(&self) -> String {
        self.default_context.clone()
    }

    fn connect(&self, context: &str) -> Result<ClusterConnection, KubeError> {
        let settings = match self.provider {
            ProviderKind::InCluster => ConnectionSettings::in_cluster()?,
            ProviderKind::Kubeconfig => self.kubeconfig.resolve(context)?,
        };
        let api = HttpCluster::new(&settings, self.limiter.clone(), self.timeout)?;
        Ok(ClusterConnection {
            api: Arc::new(api),
            default_namespace: settings.default_namespace,
        })
    }
}

/// Vends one [`ClientBundle`] per context name; the empty name means the default context.
pub struct ClientProvider {
    connector: Arc<dyn ClusterConnector>,
    bundles: DashMap<String, Arc<OnceCell<Arc<ClientBundle>>>>,
}

impl ClientProvider {
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self {
            connector,
            bundles: DashMap::new(),
        }
    }

    /// Concurrent first calls for one context construct a single bundle. A failed
    /// construction is not cached; a failed discovery leaves the catalog empty.
    pub async fn get(&self, context: &str) -> Result<Arc<ClientBundle>, KubeError> {
        let name = self.resolve_name(context);
        let cell = self.bundles.entry(name.clone()).or_default().clone();
        let bundle = cell
            .get_or_try_init(|| async {
                tracing::debug!(context = %name, "creating cluster client bundle");
                let connection = self.connector.connect(&name)?;
                let catalog = Arc::new(CapabilityCatalog::new(Arc::clone(&connection.api)));
                if let Err(e) = catalog.discover().await {
                    tracing::warn!(context = %name, error = %e, "capability discovery failed; catalog starts empty");
                }
                Ok::<_, KubeError>(Arc::new(ClientBundle {
                    context: name.clone(),
                    api: connection.api,
                    catalog,
                    default_namespace: connection.default_namespace,
                }))
            })
            .await?;
        Ok(Arc::clone(bundle))
    }

    pub fn contexts(&self) -> Vec<String> {
        self.connector.contexts()
    }

    pub fn current_context(&self) -> String {
        self.connector.current_context()
    }

    pub fn resolve_name(&self, context: &str) -> String {
        if context.is_empty() {
            self.connector.current_context()
        } else {
            context.to_string()
        }
    }
}
