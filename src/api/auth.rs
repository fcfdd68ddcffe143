//! Bearer-token authentication for the HTTP transport.

use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use super::oidc::OidcVerifier;
use crate::authz::CallerIdentity;
use crate::config::{OAuthConfig, TokenValidationConfig};
use crate::kube::{ClientProvider, KubeError};

/// Why a request was turned away. Rendered verbatim as the 401 body.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("authorization header must be 'Bearer <token>'")]
    MalformedHeader,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token is not authenticated: {0}")]
    Unauthenticated(String),

    #[error("OIDC validation is enabled but oauth.issuer_url is not set")]
    NotConfigured,

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("token review failed: {0}")]
    TokenReview(#[from] KubeError),
}

/// Turns an `Authorization` header into a [`CallerIdentity`] under the current
/// token-validation flags, which can be swapped on reload.
///
/// Only a verified token yields a bearer identity. With no verification enabled the
/// header is checked for presence and shape and the caller runs as the ambient identity.
pub struct TokenValidator {
    flags: ArcSwap<TokenValidationConfig>,
    oidc: Option<OidcVerifier>,
    clients: Arc<ClientProvider>,
}

impl TokenValidator {
    pub fn new(
        flags: TokenValidationConfig,
        oauth: &OAuthConfig,
        clients: Arc<ClientProvider>,
    ) -> Result<Self, AuthError> {
        let oidc = oauth
            .issuer_url
            .as_deref()
            .map(|issuer| OidcVerifier::new(issuer, oauth.audience.clone(), oauth.jwks_cache_ttl))
            .transpose()?;
        Ok(Self {
            flags: ArcSwap::from_pointee(flags),
            oidc,
            clients,
        })
    }

    pub fn flags(&self) -> Arc<TokenValidationConfig> {
        self.flags.load_full()
    }

    pub fn set_flags(&self, flags: TokenValidationConfig) {
        self.flags.store(Arc::new(flags));
    }

    pub async fn authenticate(&self, header: Option<&str>) -> Result<CallerIdentity, AuthError> {
        let flags = self.flags.load_full();
        let token = match header {
            Some(value) => bearer_token(value).ok_or(AuthError::MalformedHeader)?,
            None if flags.require_bearer => return Err(AuthError::MissingToken),
            None => return Ok(CallerIdentity::ambient()),
        };

        let mut subject = None;
        if flags.oidc_validation {
            let verifier = self.oidc.as_ref().ok_or(AuthError::NotConfigured)?;
            subject = Some(verifier.verify(token).await?);
        }
        if flags.token_review {
            let bundle = self.clients.get("").await?;
            let status = bundle.api.token_review(token).await?;
            if !status.authenticated {
                return Err(AuthError::Unauthenticated(
                    status.error.unwrap_or_else(|| "rejected by TokenReview".into()),
                ));
            }
            subject = status.username.or(subject);
        }

        Ok(match subject {
            Some(subject) => CallerIdentity::bearer(subject, token),
            None => CallerIdentity::ambient(),
        })
    }
}

/// The token of a `Bearer` authorization value; the scheme is case-insensitive.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
