//! Server configuration: one YAML document plus lexicographically ordered overlays.

pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to render configuration: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================
// Document
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub kubernetes: KubernetesConfig,
    pub security: SecurityConfig,
    pub oauth: OAuthConfig,
    pub helm: HelmConfig,
    pub toolsets: ToolsetFlags,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            other => Err(format!("unknown transport '{}': expected stdio or http", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub transports: Vec<TransportKind>,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Advertise `toolset_tool` instead of `toolset.tool`.
    pub normalize_tool_names: bool,
    pub http: HttpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "kubemcp".to_string(),
            transports: vec![TransportKind::Stdio],
            log_level: "info".to_string(),
            log_format: LogFormat::Console,
            normalize_tool_names: false,
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    #[serde(with = "duration")]
    pub read_timeout: Duration,
    #[serde(with = "duration")]
    pub write_timeout: Duration,
    #[serde(with = "duration")]
    pub idle_timeout: Duration,
    pub cors: CorsConfig,
    pub tls: TlsConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            cors: CorsConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    /// `*` matches any origin.
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Kubeconfig,
    InCluster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    pub provider: ProviderKind,
    pub kubeconfig: Option<PathBuf>,
    /// Empty means the kubeconfig's current context.
    pub context: String,
    pub qps: f64,
    pub burst: u32,
    #[serde(with = "duration")]
    pub timeout: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Kubeconfig,
            kubeconfig: None,
            context: String::new(),
            qps: 50.0,
            burst: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeniedResource {
    #[serde(default)]
    pub group: String,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub read_only: bool,
    pub non_destructive: bool,
    pub denied_resources: Vec<DeniedResource>,
    pub require_rbac: bool,
    #[serde(with = "duration")]
    pub authz_cache_ttl: Duration,
    pub token_validation: TokenValidationConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            non_destructive: false,
            denied_resources: Vec::new(),
            require_rbac: true,
            authz_cache_ttl: Duration::from_secs(5),
            token_validation: TokenValidationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenValidationConfig {
    /// Reject HTTP requests without `Authorization: Bearer`.
    pub require_bearer: bool,
    /// Resolve the bearer token through the cluster's TokenReview API.
    pub token_review: bool,
    /// Verify the bearer token's signature and issuer against `oauth.issuer_url`.
    pub oidc_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub issuer_url: Option<String>,
    pub audience: Option<String>,
    #[serde(with = "duration")]
    pub jwks_cache_ttl: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            issuer_url: None,
            audience: None,
            jwks_cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    pub namespace: String,
    pub max_history: u32,
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            max_history: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsetFlags {
    pub core: bool,
    pub metrics: bool,
    pub backup: bool,
    pub autoscaling: bool,
    pub gitops: bool,
    pub certificates: bool,
    pub helm: bool,
}

impl Default for ToolsetFlags {
    fn default() -> Self {
        Self {
            core: true,
            metrics: true,
            backup: true,
            autoscaling: true,
            gitops: true,
            certificates: true,
            helm: true,
        }
    }
}

impl ToolsetFlags {
    /// Flag for a toolset by name; unknown toolsets are treated as enabled.
    pub fn is_enabled(&self, toolset: &str) -> bool {
        match toolset {
            "core" => self.core,
            "metrics" => self.metrics,
            "backup" => self.backup,
            "autoscaling" => self.autoscaling,
            "gitops" => self.gitops,
            "certificates" => self.certificates,
            "helm" => self.helm,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ============================================================
// Loading
// ============================================================

impl Config {
    /// Load the base document (if any) and merge every `*.yaml`/`*.yml` overlay in
    /// `conf_d` in lexicographic order.
    pub fn load(base: Option<&Path>, conf_d: Option<&Path>) -> Result<Self, ConfigError> {
        let mut document = match base {
            Some(path) => read_document(path)?,
            None => Value::Object(Default::default()),
        };

        if let Some(dir) = conf_d {
            for overlay in overlay_files(dir)? {
                tracing::debug!(path = %overlay.display(), "merging configuration overlay");
                merge_values(&mut document, read_document(&overlay)?);
            }
        }

        let config: Config = serde_json::from_value(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let document: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let document = if document.is_null() {
            Value::Object(Default::default())
        } else {
            document
        };
        Ok(serde_json::from_value(document)?)
    }

    pub fn render(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.transports.is_empty() {
            return Err(ConfigError::Invalid(
                "server.transports must name at least one transport".into(),
            ));
        }
        if self.server.transports.contains(&TransportKind::Http)
            && self.server.http.bind_address.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "server.http.bind_address is required for the http transport".into(),
            ));
        }
        if self.kubernetes.qps.is_nan() || self.kubernetes.qps <= 0.0 {
            return Err(ConfigError::Invalid("kubernetes.qps must be positive".into()));
        }
        if self.kubernetes.burst == 0 {
            return Err(ConfigError::Invalid("kubernetes.burst must be positive".into()));
        }
        if self.security.token_validation.oidc_validation && self.oauth.issuer_url.is_none() {
            return Err(ConfigError::Invalid(
                "oauth.issuer_url is required when oidc_validation is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Take the reloadable subset from `fresh` and keep everything else from `self`.
    pub fn apply_reloadable(&self, fresh: &Config) -> ReloadOutcome {
        let mut next = self.clone();
        next.server.log_level = fresh.server.log_level.clone();
        next.server.log_format = fresh.server.log_format;
        next.toolsets = fresh.toolsets.clone();
        next.security.token_validation = fresh.security.token_validation.clone();
        next.kubernetes.qps = fresh.kubernetes.qps;
        next.kubernetes.burst = fresh.kubernetes.burst;
        next.metrics = fresh.metrics.clone();

        let mut restart_required = Vec::new();
        if self.server.transports != fresh.server.transports {
            restart_required.push("server.transports");
        }
        if self.server.http.bind_address != fresh.server.http.bind_address {
            restart_required.push("server.http.bind_address");
        }
        if self.server.http.tls != fresh.server.http.tls {
            restart_required.push("server.http.tls");
        }
        if self.kubernetes.provider != fresh.kubernetes.provider {
            restart_required.push("kubernetes.provider");
        }
        if self.oauth.issuer_url != fresh.oauth.issuer_url
            || self.oauth.audience != fresh.oauth.audience
        {
            restart_required.push("oauth");
        }

        ReloadOutcome {
            config: next,
            restart_required,
        }
    }
}

/// Result of applying a re-read configuration to the running one.
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub config: Config,
    /// Restart-only fields that differ in the re-read document and were ignored.
    pub restart_required: Vec<&'static str>,
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    })
}

fn overlay_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Structural overlay merge.
///
/// Maps merge recursively, arrays replace when non-empty, scalars replace when non-zero,
/// and `null` never replaces. Keys missing from `base` are always taken from `overlay`.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        if !value.is_null() {
                            base_map.insert(key, value);
                        }
                    }
                }
            }
        }
        (base, Value::Array(items)) => {
            if !items.is_empty() {
                *base = Value::Array(items);
            }
        }
        (base, overlay) => {
            if !is_zero(&overlay) {
                *base = overlay;
            }
        }
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}
