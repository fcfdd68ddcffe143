//! Live reconfiguration on SIGHUP.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;

use crate::api::TokenValidator;
use crate::app::App;
use crate::config::{Config, ConfigError, ReloadOutcome, TransportKind};
use crate::kube::SharedRateLimiter;
use crate::mcp::{DispatchCore, DispatchPolicy};
use crate::observability::LogHandle;

/// Where the configuration was loaded from, plus command-line overrides that every
/// load applies on top of the files.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    pub config: Option<PathBuf>,
    pub conf_d: Option<PathBuf>,
    pub transports: Option<Vec<TransportKind>>,
}

impl ConfigSource {
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = Config::load(self.config.as_deref(), self.conf_d.as_deref())?;
        if let Some(transports) = &self.transports {
            config.server.transports = transports.clone();
            config.validate()?;
        }
        Ok(config)
    }
}

/// Re-reads the configuration and pushes its reloadable subset into the running
/// components. Restart-only settings keep their running values.
pub struct Reloader {
    source: ConfigSource,
    current: ArcSwap<Config>,
    log: Option<LogHandle>,
    core: Arc<DispatchCore>,
    limiter: SharedRateLimiter,
    validator: Arc<TokenValidator>,
}

impl Reloader {
    pub fn new(app: &App, source: ConfigSource, log: Option<LogHandle>) -> Self {
        Self {
            source,
            current: ArcSwap::new(Arc::clone(&app.config)),
            log,
            core: Arc::clone(&app.core),
            limiter: app.limiter.clone(),
            validator: Arc::clone(&app.validator),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Load and validate the configuration files, then [`apply`](Self::apply) them.
    /// An invalid document leaves everything untouched.
    pub fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let fresh = self.source.load()?;
        Ok(self.apply(&fresh))
    }

    pub fn apply(&self, fresh: &Config) -> ReloadOutcome {
        let outcome = self.current.load().apply_reloadable(fresh);
        for field in &outcome.restart_required {
            tracing::warn!(field = *field, "setting changed but requires a restart; keeping the running value");
        }

        let next = &outcome.config;
        if let Some(log) = &self.log {
            if let Err(e) = log.set_level(&next.server.log_level) {
                tracing::warn!(error = %e, "log level not changed");
            }
            if let Err(e) = log.set_format(next.server.log_format) {
                tracing::warn!(error = %e, "log format not changed");
            }
        }
        self.core.set_policy(DispatchPolicy::from_config(next));
        self.validator.set_flags(next.security.token_validation.clone());
        self.limiter.update(next.kubernetes.qps, next.kubernetes.burst);
        self.core.metrics().set_enabled(next.metrics.enabled);
        self.current.store(Arc::new(next.clone()));

        tracing::info!(
            restart_required = outcome.restart_required.len(),
            "configuration reloaded"
        );
        outcome
    }
}

/// Reload on every SIGHUP until `shutdown` fires.
#[cfg(unix)]
pub async fn watch_sighup(reloader: Arc<Reloader>, shutdown: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            received = hangup.recv() => {
                if received.is_none() {
                    return Ok(());
                }
                tracing::info!("SIGHUP received, reloading configuration");
                if let Err(e) = reloader.reload() {
                    tracing::error!(error = %e, "configuration reload failed; keeping the running configuration");
                }
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn watch_sighup(_reloader: Arc<Reloader>, shutdown: CancellationToken) -> std::io::Result<()> {
    shutdown.cancelled().await;
    Ok(())
}
