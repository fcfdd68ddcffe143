use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use kubemcp::{
    api,
    app::App,
    config::TransportKind,
    kube::{KubeconfigConnector, SharedRateLimiter},
    mcp,
    observability::logging,
    reload::{self, ConfigSource, Reloader},
};

#[derive(Parser)]
#[command(name = "kubemcp")]
#[command(about = "Model Context Protocol server for Kubernetes clusters")]
#[command(disable_version_flag = true)]
struct Cli {
    /// Base configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory of overlay files, merged in lexicographic order
    #[arg(long = "conf-d", value_name = "DIR")]
    conf_d: Option<PathBuf>,

    /// Serve only this transport, overriding the configuration
    #[arg(long, value_enum)]
    transport: Option<Transport>,

    /// Print the version and exit
    #[arg(long)]
    version: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

impl From<Transport> for TransportKind {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Stdio => TransportKind::Stdio,
            Transport::Http => TransportKind::Http,
        }
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_shutdown(shutdown: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let source = ConfigSource {
        config: cli.config,
        conf_d: cli.conf_d,
        transports: cli.transport.map(|transport| vec![transport.into()]),
    };
    let config = source.load()?;

    // stdout is the stdio protocol channel, so logs always go to stderr
    let log = logging::init(&config.server.log_level, config.server.log_format)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transports = ?config.server.transports,
        "starting kubemcp"
    );

    let limiter = SharedRateLimiter::new(config.kubernetes.qps, config.kubernetes.burst);
    let connector = Arc::new(KubeconfigConnector::from_config(
        &config.kubernetes,
        limiter.clone(),
    )?);
    let app = App::build(config, connector, limiter).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(shutdown.clone()));

    let reloader = Arc::new(Reloader::new(
        &app,
        source,
        Some(log),
    ));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = reload::watch_sighup(reloader, shutdown).await {
                tracing::warn!(error = %e, "live reload unavailable");
            }
        }
    });

    let mut transports = JoinSet::new();
    for transport in &app.config.server.transports {
        match transport {
            TransportKind::Stdio => {
                transports.spawn(mcp::run_stdio_server(app.server.clone(), shutdown.clone()));
            }
            TransportKind::Http => {
                transports.spawn(api::run_http_server(
                    app.http_state(),
                    app.config.server.http.clone(),
                    shutdown.clone(),
                ));
            }
        }
    }

    // The first transport to stop takes the others down with it.
    let mut failure = None;
    while let Some(joined) = transports.join_next().await {
        shutdown.cancel();
        let result = joined.map_err(anyhow::Error::from).and_then(|r| r);
        if let Err(e) = result {
            tracing::error!(error = %e, "transport failed");
            failure.get_or_insert(e);
        }
    }

    match failure {
        Some(e) => Err(e),
        None => {
            tracing::info!("kubemcp stopped");
            Ok(())
        }
    }
}
