//! REST client for the Kubernetes API.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};

use super::{
    ApiGroupInfo, ApiResourceInfo, ClusterApi, ConnectionSettings, CrdInfo, Gvr, KubeError,
    ListOptions, LogOptions, ResourceAttributes, SharedRateLimiter, TokenReviewStatus,
};

const MERGE_PATCH: &str = "application/merge-patch+json";

/// [`ClusterApi`] over HTTPS with bearer-token or client-certificate credentials.
#[derive(Debug, Clone)]
pub struct HttpCluster {
    base_url: String,
    token: Option<String>,
    token_file: Option<PathBuf>,
    client: Client,
    limiter: SharedRateLimiter,
}

impl HttpCluster {
    pub fn new(
        settings: &ConnectionSettings,
        limiter: SharedRateLimiter,
        timeout: Duration,
    ) -> Result<Self, KubeError> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .use_rustls_tls();

        if let Some(pem) = &settings.ca_pem {
            for cert in reqwest::Certificate::from_pem_bundle(pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }
        if settings.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(pem) = &settings.identity_pem {
            builder = builder.identity(reqwest::Identity::from_pem(pem)?);
        }

        Ok(Self {
            base_url: settings.server.clone(),
            token: settings.token.clone(),
            token_file: settings.token_file.clone(),
            client: builder.build()?,
            limiter,
        })
    }

    /// Token files are re-read on every request so projected tokens rotate.
    fn ambient_token(&self) -> Option<String> {
        if let Some(token) = &self.token {
            return Some(token.clone());
        }
        let path = self.token_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read token file");
                None
            }
        }
    }

    /// Build a request with rate limiting and credentials applied.
    async fn request(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
    ) -> reqwest::RequestBuilder {
        self.limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, &url);
        match bearer.map(str::to_string).or_else(|| self.ambient_token()) {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Convert non-success responses into `KubeError::Api` using the Status body.
    async fn handle_response(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, KubeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: Option<Value> = serde_json::from_str(&body).ok();
        let reason = parsed
            .as_ref()
            .and_then(|v| v.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default_reason(status));
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(body);
        tracing::debug!(path, status = status.as_u16(), %reason, "cluster API returned an error");
        Err(KubeError::api(status.as_u16(), reason, message))
    }

    async fn send_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<(Value, &'static str)>,
        bearer: Option<&str>,
    ) -> Result<Value, KubeError> {
        let mut req = self.request(method, path, bearer).await.query(query);
        if let Some((body, content_type)) = body {
            req = req
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(serde_json::to_vec(&body).map_err(|e| KubeError::Decode {
                    path: path.to_string(),
                    message: e.to_string(),
                })?);
        }
        let response = self.handle_response(path, req.send().await?).await?;
        response.json().await.map_err(|e| KubeError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, KubeError> {
        self.send_json(Method::GET, path, query, None, None).await
    }
}

fn default_reason(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("Unknown")
        .replace(' ', "")
}

fn dry_run_query(dry_run: bool) -> Vec<(&'static str, String)> {
    if dry_run {
        vec![("dryRun", "All".to_string())]
    } else {
        Vec::new()
    }
}

#[async_trait]
impl ClusterApi for HttpCluster {
    async fn list_crds(&self) -> Result<Vec<CrdInfo>, KubeError> {
        let list = self
            .get_json("/apis/apiextensions.k8s.io/v1/customresourcedefinitions", &[])
            .await?;
        Ok(super::list_items(&list).iter().filter_map(parse_crd).collect())
    }

    async fn server_groups(&self) -> Result<Vec<ApiGroupInfo>, KubeError> {
        let groups = self.get_json("/apis", &[]).await?;
        Ok(groups
            .get("groups")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|g| {
                        Some(ApiGroupInfo {
                            name: g.get("name")?.as_str()?.to_string(),
                            preferred_version: g
                                .pointer("/preferredVersion/version")?
                                .as_str()?
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn group_resources(
        &self,
        group_version: &str,
    ) -> Result<Vec<ApiResourceInfo>, KubeError> {
        let list = self.get_json(&format!("/apis/{}", group_version), &[]).await?;
        Ok(list
            .get("resources")
            .and_then(Value::as_array)
            .map(|resources| {
                resources
                    .iter()
                    .filter_map(|r| {
                        let name = r.get("name")?.as_str()?;
                        if name.contains('/') {
                            return None;
                        }
                        Some(ApiResourceInfo {
                            name: name.to_string(),
                            kind: r.get("kind")?.as_str()?.to_string(),
                            namespaced: r.get("namespaced").and_then(Value::as_bool)?,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Value, KubeError> {
        let mut query = Vec::new();
        if let Some(selector) = &options.label_selector {
            query.push(("labelSelector", selector.clone()));
        }
        if let Some(limit) = options.limit {
            query.push(("limit", limit.to_string()));
        }
        self.get_json(&gvr.collection_path(namespace), &query).await
    }

    async fn get(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, KubeError> {
        self.get_json(&gvr.item_path(namespace, name), &[]).await
    }

    async fn create(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        body: Value,
        dry_run: bool,
    ) -> Result<Value, KubeError> {
        self.send_json(
            Method::POST,
            &gvr.collection_path(namespace),
            &dry_run_query(dry_run),
            Some((body, "application/json")),
            None,
        )
        .await
    }

    async fn delete(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        dry_run: bool,
    ) -> Result<Value, KubeError> {
        self.send_json(
            Method::DELETE,
            &gvr.item_path(namespace, name),
            &dry_run_query(dry_run),
            None,
            None,
        )
        .await
    }

    async fn merge_patch(
        &self,
        gvr: &Gvr,
        namespace: Option<&str>,
        name: &str,
        patch: Value,
        dry_run: bool,
    ) -> Result<Value, KubeError> {
        self.send_json(
            Method::PATCH,
            &gvr.item_path(namespace, name),
            &dry_run_query(dry_run),
            Some((patch, MERGE_PATCH)),
            None,
        )
        .await
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &LogOptions,
    ) -> Result<String, KubeError> {
        let path = format!(
            "{}/log",
            Gvr::new("", "v1", "pods", true).item_path(Some(namespace), pod)
        );
        let mut query = Vec::new();
        if let Some(container) = &options.container {
            query.push(("container", container.clone()));
        }
        if let Some(tail) = options.tail_lines {
            query.push(("tailLines", tail.to_string()));
        }
        if let Some(since) = options.since_seconds {
            query.push(("sinceSeconds", since.to_string()));
        }
        let req = self.request(Method::GET, &path, None).await.query(&query);
        let response = self.handle_response(&path, req.send().await?).await?;
        Ok(response.text().await?)
    }

    async fn self_access_review(
        &self,
        attributes: &ResourceAttributes,
        bearer: Option<&str>,
    ) -> Result<bool, KubeError> {
        let body = json!({
            "apiVersion": "authorization.k8s.io/v1",
            "kind": "SelfSubjectAccessReview",
            "spec": { "resourceAttributes": attributes },
        });
        let review = self
            .send_json(
                Method::POST,
                "/apis/authorization.k8s.io/v1/selfsubjectaccessreviews",
                &[],
                Some((body, "application/json")),
                bearer,
            )
            .await?;
        Ok(review
            .pointer("/status/allowed")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn token_review(&self, token: &str) -> Result<TokenReviewStatus, KubeError> {
        let body = json!({
            "apiVersion": "authentication.k8s.io/v1",
            "kind": "TokenReview",
            "spec": { "token": token },
        });
        let review = self
            .send_json(
                Method::POST,
                "/apis/authentication.k8s.io/v1/tokenreviews",
                &[],
                Some((body, "application/json")),
                None,
            )
            .await?;
        Ok(TokenReviewStatus {
            authenticated: review
                .pointer("/status/authenticated")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            username: review
                .pointer("/status/user/username")
                .and_then(Value::as_str)
                .map(str::to_string),
            error: review
                .pointer("/status/error")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn parse_crd(item: &Value) -> Option<CrdInfo> {
    let spec = item.get("spec")?;
    Some(CrdInfo {
        group: spec.get("group")?.as_str()?.to_string(),
        kind: spec.pointer("/names/kind")?.as_str()?.to_string(),
        plural: spec.pointer("/names/plural")?.as_str()?.to_string(),
        namespaced: spec.get("scope").and_then(Value::as_str) != Some("Cluster"),
        served_versions: spec
            .get("versions")
            .and_then(Value::as_array)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|v| v.get("served").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|v| v.get("name").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    })
}
