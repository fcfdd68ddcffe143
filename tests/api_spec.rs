mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use kubemcp::api::{create_router, serve, AuthError};
use kubemcp::app::App;
use kubemcp::config::{Config, HttpConfig};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use common::{build_app, FakeCluster};

fn server_for(app: &App, http: &HttpConfig) -> TestServer {
    let router = create_router(app.http_state(), http, CancellationToken::new());
    TestServer::new(router).expect("Failed to create test server")
}

async fn setup(config: Config) -> (TestServer, App) {
    let app = build_app(FakeCluster::new(), config.clone()).await;
    let server = server_for(&app, &config.server.http);
    (server, app)
}

fn requiring_bearer() -> Config {
    let mut config = Config::default();
    config.security.token_validation.require_bearer = true;
    config
}

fn initialize_request() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "api-spec", "version": "1.0.0"}
        }
    })
}

mod auxiliary_routes {
    use super::*;

    #[tokio::test]
    async fn health_reports_healthy() {
        let (server, _app) = setup(Config::default()).await;

        let response = server.get("/health").await;

        response.assert_status_ok();
        response.assert_json(&json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn well_known_advertises_the_endpoint() {
        let mut config = Config::default();
        config.server.name = "cluster-a".into();
        config.server.normalize_tool_names = true;
        let (server, _app) = setup(config).await;

        let response = server.get("/.well-known/mcp").await;

        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["name"], "cluster-a");
        assert_eq!(body["endpoint"], "/mcp");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn metrics_expose_tool_and_http_counters() {
        let (server, app) = setup(Config::default()).await;
        app.core
            .invoke("core.contexts_list", json!({}), Default::default())
            .await
            .expect("contexts_list succeeds");
        server.get("/health").await.assert_status_ok();

        let response = server.get("/metrics").await;

        response.assert_status_ok();
        let text = response.text();
        assert!(text.contains("tool_calls_total"));
        assert!(text.contains("core.contexts_list"));
        assert_eq!(
            app.metrics.counter_value("http_requests_total", &[("path", "/health"), ("status", "200")]),
            1
        );
    }

    #[tokio::test]
    async fn unrouted_paths_share_one_metrics_label() {
        let (server, app) = setup(Config::default()).await;

        server.get("/no/such/path/1").await.assert_status(StatusCode::NOT_FOUND);
        server.get("/no/such/path/2").await.assert_status(StatusCode::NOT_FOUND);

        assert_eq!(
            app.metrics.counter_value("http_requests_total", &[("path", "unmatched"), ("status", "404")]),
            2
        );
    }

    #[tokio::test]
    async fn auxiliary_routes_need_no_token() {
        let (server, _app) = setup(requiring_bearer()).await;
        server.get("/health").await.assert_status_ok();
        server.get("/.well-known/mcp").await.assert_status_ok();
    }
}

mod authentication {
    use super::*;

    #[tokio::test]
    async fn rejects_requests_without_a_token() {
        let (server, _app) = setup(requiring_bearer()).await;

        let response = server.post("/mcp").json(&initialize_request()).await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.text(), "missing bearer token");
    }

    #[tokio::test]
    async fn rejects_malformed_authorization_headers() {
        let (server, _app) = setup(Config::default()).await;

        let response = server
            .post("/mcp")
            .add_header(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"))
            .json(&initialize_request())
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_tokens_the_cluster_does_not_recognize() {
        let mut config = requiring_bearer();
        config.security.token_validation.token_review = true;
        let (server, _app) = setup(config).await;

        let response = server
            .post("/mcp")
            .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer forged"))
            .json(&initialize_request())
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert!(response.text().contains("invalid bearer token"));
    }
}

mod token_validation {
    use super::*;

    #[tokio::test]
    async fn token_review_yields_the_callers_identity() {
        let cluster = FakeCluster::new();
        cluster.accept_token("good-token", "system:serviceaccount:ops:agent");
        let mut config = requiring_bearer();
        config.security.token_validation.token_review = true;
        let app = build_app(Arc::clone(&cluster), config).await;

        let identity = app
            .validator
            .authenticate(Some("Bearer good-token"))
            .await
            .expect("token is accepted");

        assert_eq!(identity.subject, "system:serviceaccount:ops:agent");
        assert_eq!(identity.token.as_deref(), Some("good-token"));
    }

    #[tokio::test]
    async fn unverified_tokens_run_as_the_ambient_identity() {
        let app = build_app(FakeCluster::new(), requiring_bearer()).await;

        let identity = app
            .validator
            .authenticate(Some("Bearer anything"))
            .await
            .expect("shape-only check passes");

        assert!(identity.is_ambient());
    }

    #[tokio::test]
    async fn missing_tokens_are_allowed_unless_required() {
        let app = build_app(FakeCluster::new(), Config::default()).await;
        assert!(app.validator.authenticate(None).await.unwrap().is_ambient());

        app.validator.set_flags(requiring_bearer().security.token_validation);
        assert!(matches!(
            app.validator.authenticate(None).await,
            Err(AuthError::MissingToken)
        ));
    }
}

mod cors {
    use super::*;

    #[tokio::test]
    async fn allows_configured_origins() {
        let mut config = Config::default();
        config.server.http.cors.enabled = true;
        config.server.http.cors.allowed_origins = vec!["https://console.example.com".into()];
        let (server, _app) = setup(config).await;

        let response = server
            .get("/health")
            .add_header(header::ORIGIN, HeaderValue::from_static("https://console.example.com"))
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "https://console.example.com"
        );
    }

    #[tokio::test]
    async fn wildcard_allows_any_origin() {
        let mut config = Config::default();
        config.server.http.cors.enabled = true;
        config.server.http.cors.allowed_origins = vec!["*".into()];
        let (server, _app) = setup(config).await;

        let response = server
            .get("/health")
            .add_header(header::ORIGIN, HeaderValue::from_static("https://anywhere.example"))
            .await;

        assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    }

    #[tokio::test]
    async fn sends_no_cors_headers_when_disabled() {
        let (server, _app) = setup(Config::default()).await;

        let response = server
            .get("/health")
            .add_header(header::ORIGIN, HeaderValue::from_static("https://console.example.com"))
            .await;

        assert!(response
            .maybe_header(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}

mod timeouts {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Serves `config` on an ephemeral port, returning its address and the shutdown token.
    async fn spawn_server(config: Config) -> (std::net::SocketAddr, CancellationToken) {
        let app = build_app(FakeCluster::new(), config.clone()).await;
        let shutdown = CancellationToken::new();
        let router = create_router(app.http_state(), &config.server.http, shutdown.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let http = config.server.http.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { serve(listener, router, &http, token).await });
        (addr, shutdown)
    }

    /// First chunk the server sends back, empty when it just closes the connection.
    async fn first_reply(stream: &mut TcpStream) -> String {
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn a_stalled_request_body_is_cut_off() {
        let mut config = Config::default();
        config.server.http.read_timeout = Duration::from_millis(200);
        let (addr, shutdown) = spawn_server(config).await;

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(
                b"POST /mcp HTTP/1.1\r\nHost: localhost\r\n\
                  Content-Type: application/json\r\n\
                  Accept: application/json, text/event-stream\r\n\
                  Content-Length: 512\r\n\r\n{\"jsonrpc\":",
            )
            .await
            .expect("write");

        let reply = tokio::time::timeout(Duration::from_secs(5), first_reply(&mut stream))
            .await
            .expect("stalled body was not cut off");
        assert!(!reply.starts_with("HTTP/1.1 200"), "{}", reply);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn stalled_request_headers_close_the_connection() {
        let mut config = Config::default();
        config.server.http.idle_timeout = Duration::from_millis(300);
        let (addr, shutdown) = spawn_server(config).await;

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .expect("write");

        let reply = tokio::time::timeout(Duration::from_secs(5), first_reply(&mut stream))
            .await
            .expect("stalled headers were not cut off");
        assert!(!reply.contains("healthy"));
        shutdown.cancel();
    }
}
