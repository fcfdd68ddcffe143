//! Minimal kubeconfig reader: clusters, users, contexts and `current-context`.
//!
//! Supported credentials are bearer tokens (inline or `tokenFile`) and client
//! certificates. Exec and auth-provider plugins are rejected with a clear error.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use super::KubeError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Name given to the single context of the in-cluster provider.
pub const IN_CLUSTER_CONTEXT: &str = "in-cluster";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default)]
    pub current_context: Option<String>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterEntry {
    pub server: String,
    #[serde(default)]
    pub certificate_authority: Option<PathBuf>,
    #[serde(default)]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: UserEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserEntry {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "tokenFile")]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate: Option<PathBuf>,
    #[serde(default)]
    pub client_certificate_data: Option<String>,
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    #[serde(default)]
    pub client_key_data: Option<String>,
    #[serde(default)]
    pub exec: Option<serde_yaml::Value>,
    #[serde(default)]
    pub auth_provider: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextEntry {
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Everything needed to open a connection to one cluster.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    pub server: String,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure: bool,
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    /// PEM bundle holding the client certificate followed by its key.
    pub identity_pem: Option<Vec<u8>>,
    pub default_namespace: String,
}

impl Kubeconfig {
    /// `$KUBECONFIG` (first entry) or `~/.kube/config`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(value) = std::env::var("KUBECONFIG") {
            if let Some(first) = std::env::split_paths(&value).next() {
                if !first.as_os_str().is_empty() {
                    return Some(first);
                }
            }
        }
        dirs::home_dir().map(|home| home.join(".kube").join("config"))
    }

    pub fn load(path: &Path) -> Result<Self, KubeError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            KubeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, KubeError> {
        serde_yaml::from_str(text)
            .map_err(|e| KubeError::Config(format!("invalid kubeconfig: {}", e)))
    }

    pub fn context_names(&self) -> Vec<String> {
        self.contexts.iter().map(|c| c.name.clone()).collect()
    }

    pub fn current_context(&self) -> Option<&str> {
        self.current_context.as_deref().filter(|c| !c.is_empty())
    }

    /// Resolve a context (empty = current) into connection settings.
    pub fn resolve(&self, context: &str) -> Result<ConnectionSettings, KubeError> {
        let context_name = if context.is_empty() {
            self.current_context()
                .ok_or_else(|| KubeError::Config("no current-context is set".into()))?
        } else {
            context
        };

        let context = self
            .contexts
            .iter()
            .find(|c| c.name == context_name)
            .ok_or_else(|| KubeError::Config(format!("context '{}' not found", context_name)))?;
        let cluster = self
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .ok_or_else(|| {
                KubeError::Config(format!("cluster '{}' not found", context.context.cluster))
            })?;
        let user = self
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .map(|u| u.user.clone())
            .unwrap_or_default();

        if user.exec.is_some() || user.auth_provider.is_some() {
            return Err(KubeError::Config(format!(
                "user '{}' uses an exec or auth-provider plugin, which is not supported; \
                 use a token or client certificate",
                context.context.user
            )));
        }

        let ca_pem = match (
            &cluster.cluster.certificate_authority_data,
            &cluster.cluster.certificate_authority,
        ) {
            (Some(data), _) => Some(decode_data("certificate-authority-data", data)?),
            (None, Some(path)) => Some(self.read_relative(path)?),
            (None, None) => None,
        };

        let certificate = match (&user.client_certificate_data, &user.client_certificate) {
            (Some(data), _) => Some(decode_data("client-certificate-data", data)?),
            (None, Some(path)) => Some(self.read_relative(path)?),
            (None, None) => None,
        };
        let key = match (&user.client_key_data, &user.client_key) {
            (Some(data), _) => Some(decode_data("client-key-data", data)?),
            (None, Some(path)) => Some(self.read_relative(path)?),
            (None, None) => None,
        };
        let identity_pem = match (certificate, key) {
            (Some(mut cert), Some(key)) => {
                cert.push(b'\n');
                cert.extend_from_slice(&key);
                Some(cert)
            }
            _ => None,
        };

        Ok(ConnectionSettings {
            server: cluster.cluster.server.trim_end_matches('/').to_string(),
            ca_pem,
            insecure: cluster.cluster.insecure_skip_tls_verify,
            token: user.token.clone(),
            token_file: user.token_file.as_ref().map(|p| self.relative(p)),
            identity_pem,
            default_namespace: context
                .context
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        })
    }

    fn relative(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_relative(&self, path: &Path) -> Result<Vec<u8>, KubeError> {
        let path = self.relative(path);
        std::fs::read(&path)
            .map_err(|e| KubeError::Config(format!("failed to read {}: {}", path.display(), e)))
    }
}

impl ConnectionSettings {
    /// Service account credentials mounted into a pod.
    pub fn in_cluster() -> Result<Self, KubeError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| KubeError::Config("KUBERNETES_SERVICE_HOST is not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let ca_pem = std::fs::read(dir.join("ca.crt")).ok();
        let default_namespace = std::fs::read_to_string(dir.join("namespace"))
            .map(|ns| ns.trim().to_string())
            .unwrap_or_else(|_| "default".to_string());

        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        Ok(Self {
            server: format!("https://{}:{}", host, port),
            ca_pem,
            insecure: false,
            token: None,
            token_file: Some(dir.join("token")),
            identity_pem: None,
            default_namespace,
        })
    }
}

fn decode_data(field: &str, data: &str) -> Result<Vec<u8>, KubeError> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| KubeError::Config(format!("invalid base64 in {}: {}", field, e)))
}
