//! HTTP transport: the MCP endpoint plus health, metrics and discovery routes.

mod auth;
mod handlers;
mod middleware;
mod oidc;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::from_fn_with_state,
    routing::get,
    Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::{conn::auto, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::{RequestBodyTimeoutLayer, TimeoutBody, TimeoutLayer},
    trace::TraceLayer,
};

pub use auth::{bearer_token, AuthError, TokenValidator};
pub use oidc::OidcVerifier;

use crate::config::{CorsConfig, HttpConfig};
use crate::mcp::KubeMcpServer;
use crate::observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub name: String,
    pub server: KubeMcpServer,
    pub metrics: Arc<Metrics>,
    pub validator: Arc<TokenValidator>,
}

pub fn create_router(state: AppState, http: &HttpConfig, shutdown: CancellationToken) -> Router {
    let server = state.server.clone();
    let service: StreamableHttpService<KubeMcpServer, LocalSessionManager> =
        StreamableHttpService::new(
            move || Ok(server.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig {
                stateful_mode: true,
                cancellation_token: shutdown.child_token(),
                ..Default::default()
            },
        );

    let mcp = Router::new()
        .route_service("/mcp", service)
        .layer(from_fn_with_state(
            Arc::clone(&state.validator),
            middleware::auth_middleware,
        ));

    // Streaming MCP responses are long-lived, so only these routes carry the write timeout.
    let auxiliary = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/.well-known/mcp", get(handlers::well_known))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            http.write_timeout,
        ))
        .with_state(state.clone());

    let router = auxiliary.merge(mcp).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(RequestBodyTimeoutLayer::new(http.read_timeout))
            .map_request(|req: Request<TimeoutBody<Body>>| req.map(Body::new))
            .layer(from_fn_with_state(
                Arc::clone(&state.metrics),
                middleware::metrics_middleware,
            )),
    );

    if http.cors.enabled {
        router.layer(cors_layer(&http.cors))
    } else {
        router
    }
}

/// `*` allows any origin; other entries are matched exactly.
fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins = if cors.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Open connections get this long to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve until `shutdown` fires, then drain in-flight requests.
pub async fn run_http_server(
    state: AppState,
    http: HttpConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if http.tls.cert_file.is_some() || http.tls.key_file.is_some() {
        tracing::warn!("TLS material is configured but not terminated here; put a TLS proxy in front");
    }

    let router = create_router(state, &http, shutdown.clone());
    let listener = TcpListener::bind(&http.bind_address).await?;
    tracing::info!(
        "MCP HTTP server listening on http://{}/mcp",
        listener.local_addr()?
    );

    serve(listener, router, &http, shutdown).await;

    tracing::info!("MCP HTTP server stopped");
    Ok(())
}

/// Accept connections on `listener` until `shutdown` fires. A connection that sends no
/// request headers for `idle_timeout` is closed; request bodies are bounded by
/// `read_timeout` in the router.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    http: &HttpConfig,
    shutdown: CancellationToken,
) {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(http.idle_timeout);
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                let service = TowerToHyperService::new(router.clone());
                let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                let connection = graceful.watch(connection.into_owned());
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::debug!(%peer, error = %e, "connection ended with an error");
                    }
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }

    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => {}
        _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
            tracing::warn!("connections still open after the drain timeout; closing them");
        }
    }
}
