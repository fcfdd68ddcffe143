//! Authorization decisions from the cluster's self-permission API, cached with a TTL.

use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::kube::{ClusterApi, KubeError, ResourceAttributes};

/// Subject used when a request carries no verified bearer token.
pub const AMBIENT_IDENTITY: &str = "ambient";

/// Who is asking. A verified bearer token is forwarded to the self-permission query so
/// the cluster evaluates the caller's own permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject: String,
    pub token: Option<String>,
}

impl CallerIdentity {
    pub fn ambient() -> Self {
        Self {
            subject: AMBIENT_IDENTITY.to_string(),
            token: None,
        }
    }

    pub fn bearer(subject: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            token: Some(token.into()),
        }
    }

    pub fn is_ambient(&self) -> bool {
        self.token.is_none()
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::ambient()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecisionKey {
    cluster: String,
    identity: String,
    verb: String,
    group: String,
    resource: String,
    subresource: String,
    namespace: String,
}

#[derive(Debug, Clone, Copy)]
struct Decision {
    allowed: bool,
    expires_at: Instant,
}

type Slot = Arc<Mutex<Option<Decision>>>;

/// Each key owns an async slot: concurrent misses on one key wait for the first query,
/// while other keys proceed independently. Expired slots are swept on access, at most
/// once per TTL.
pub struct AuthorizationCache {
    ttl: Duration,
    slots: DashMap<DecisionKey, Slot>,
    next_sweep: SyncMutex<Instant>,
}

impl AuthorizationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: DashMap::new(),
            next_sweep: SyncMutex::new(Instant::now()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn allowed(
        &self,
        api: &dyn ClusterApi,
        cluster: &str,
        identity: &CallerIdentity,
        attributes: &ResourceAttributes,
    ) -> Result<bool, KubeError> {
        let key = DecisionKey {
            cluster: cluster.to_string(),
            identity: identity.subject.clone(),
            verb: attributes.verb.clone(),
            group: attributes.group.clone(),
            resource: attributes.resource.clone(),
            subresource: attributes.subresource.clone().unwrap_or_default(),
            namespace: attributes.namespace.clone().unwrap_or_default(),
        };
        self.evict_expired(Instant::now());
        let slot = self.slots.entry(key).or_default().clone();
        let mut decision = slot.lock().await;

        if let Some(cached) = *decision {
            if Instant::now() < cached.expires_at {
                return Ok(cached.allowed);
            }
        }

        let allowed = api
            .self_access_review(attributes, identity.token.as_deref())
            .await?;
        tracing::debug!(
            identity = %identity.subject,
            verb = %attributes.verb,
            group = %attributes.group,
            resource = %attributes.resource,
            namespace = attributes.namespace.as_deref().unwrap_or(""),
            allowed,
            "authorization decision"
        );
        *decision = Some(Decision {
            allowed,
            expires_at: Instant::now() + self.ttl,
        });
        Ok(allowed)
    }

    /// Drops slots holding an expired decision, or none at all, that no caller is
    /// using. Slots locked by an in-flight query or held by a waiting caller stay.
    fn evict_expired(&self, now: Instant) {
        let Ok(mut next) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + self.ttl;
        drop(next);

        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            let live = match slot.try_lock() {
                Ok(guard) => {
                    let decision: Option<Decision> = *guard;
                    decision.is_some_and(|d| now < d.expires_at)
                }
                Err(_) => true,
            };
            live || Arc::strong_count(slot) > 1
        });
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            tracing::debug!(evicted, "evicted expired authorization decisions");
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
