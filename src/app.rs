//! Startup wiring: one configuration in, a ready MCP server out.

use std::sync::Arc;

use anyhow::Context;

use crate::api::{AppState, TokenValidator};
use crate::authz::AuthorizationCache;
use crate::config::Config;
use crate::kube::{ClientProvider, ClusterConnector, SharedRateLimiter};
use crate::mcp::{DispatchCore, DispatchPolicy, KubeMcpServer};
use crate::observability::Metrics;
use crate::toolsets::{self, ToolsetDeps};

/// Everything the transports and the reload handler share.
pub struct App {
    pub config: Arc<Config>,
    pub core: Arc<DispatchCore>,
    pub server: KubeMcpServer,
    pub metrics: Arc<Metrics>,
    pub limiter: SharedRateLimiter,
    pub validator: Arc<TokenValidator>,
}

impl App {
    /// Connects to the default context, discovers its capabilities and registers
    /// every toolset the cluster can serve.
    pub async fn build(
        config: Config,
        connector: Arc<dyn ClusterConnector>,
        limiter: SharedRateLimiter,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let clients = Arc::new(ClientProvider::new(connector));

        let default_context = clients.current_context();
        let bundle = clients
            .get("")
            .await
            .with_context(|| format!("failed to connect to context {default_context}"))?;
        tracing::info!(
            context = %bundle.context,
            kinds = bundle.catalog.snapshot().len(),
            "connected to default context"
        );

        let deps = ToolsetDeps {
            clients: Arc::clone(&clients),
            catalog: Arc::clone(&bundle.catalog),
            config: Arc::clone(&config),
        };
        let toolsets = toolsets::assemble(&deps);
        let registry = toolsets::build_registry(
            &toolsets,
            &config.security,
            config.server.normalize_tool_names,
        )?;
        tracing::info!(
            tools = registry.len(),
            normalized = registry.normalizes(),
            "tool registry ready"
        );

        let metrics = Arc::new(Metrics::new(config.metrics.enabled)?);
        let authz = Arc::new(AuthorizationCache::new(config.security.authz_cache_ttl));
        let core = Arc::new(DispatchCore::new(
            Arc::new(registry),
            Arc::clone(&clients),
            authz,
            Arc::clone(&metrics),
            DispatchPolicy::from_config(&config),
        ));
        let server = KubeMcpServer::new(config.server.name.clone(), Arc::clone(&core));
        let validator = Arc::new(TokenValidator::new(
            config.security.token_validation.clone(),
            &config.oauth,
            clients,
        )?);

        Ok(Self {
            config,
            core,
            server,
            metrics,
            limiter,
            validator,
        })
    }

    pub fn http_state(&self) -> AppState {
        AppState {
            name: self.config.server.name.clone(),
            server: self.server.clone(),
            metrics: Arc::clone(&self.metrics),
            validator: Arc::clone(&self.validator),
        }
    }
}
