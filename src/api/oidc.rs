//! Bearer-token verification against an OIDC issuer's published signing keys.

use std::time::Duration;

use jsonwebtoken::{decode, decode_header, jwk::JwkSet, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::auth::AuthError;

#[derive(Debug, Deserialize)]
struct Discovery {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies signature, issuer and (when configured) audience. Keys come from the
/// issuer's discovery document and are cached for `ttl`; an unknown key id forces one
/// refetch so key rotation is picked up before the cache expires.
pub struct OidcVerifier {
    issuer: String,
    audience: Option<String>,
    client: reqwest::Client,
    ttl: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl std::fmt::Debug for OidcVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcVerifier")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl OidcVerifier {
    pub fn new(
        issuer: &str,
        audience: Option<String>,
        ttl: Duration,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Discovery(e.to_string()))?;
        Ok(Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            audience,
            client,
            ttl,
            cache: RwLock::new(None),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The verified token's subject.
    pub async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| AuthError::InvalidToken("token header has no key id".into()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        data.claims
            .sub
            .or(data.claims.email)
            .ok_or_else(|| AuthError::InvalidToken("token has no subject".into()))
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    if let Some(jwk) = cached.keys.find(kid) {
                        return DecodingKey::from_jwk(jwk)
                            .map_err(|e| AuthError::InvalidToken(e.to_string()));
                    }
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        key.ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key {kid}")))
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let discovery_url = format!("{}/.well-known/openid-configuration", self.issuer);
        let discovery: Discovery = self.get_json(&discovery_url).await?;
        let keys: JwkSet = self.get_json(&discovery.jwks_uri).await?;
        tracing::debug!(issuer = %self.issuer, keys = keys.keys.len(), "fetched issuer signing keys");
        Ok(keys)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AuthError> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| AuthError::Discovery(format!("{url}: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("{url}: {e}")))
    }
}
