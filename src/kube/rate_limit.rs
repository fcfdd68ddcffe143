use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Token bucket shared by every client bundle. The quota can be swapped at runtime;
/// callers already waiting keep the bucket they started with.
#[derive(Clone)]
pub struct SharedRateLimiter {
    limiter: Arc<ArcSwap<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for SharedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRateLimiter").finish_non_exhaustive()
    }
}

impl SharedRateLimiter {
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            limiter: Arc::new(ArcSwap::from_pointee(RateLimiter::direct(quota(qps, burst)))),
        }
    }

    pub fn update(&self, qps: f64, burst: u32) {
        self.limiter
            .store(Arc::new(RateLimiter::direct(quota(qps, burst))));
        tracing::info!(qps, burst, "updated cluster client rate limit");
    }

    /// Wait until one request may be sent.
    pub async fn until_ready(&self) {
        let limiter = self.limiter.load_full();
        limiter.until_ready().await;
    }

    /// Take one permit without waiting.
    pub fn try_acquire(&self) -> bool {
        self.limiter.load().check().is_ok()
    }
}

fn quota(qps: f64, burst: u32) -> Quota {
    let period = Duration::from_secs_f64(1.0 / qps.max(0.001));
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_bounds_immediate_permits() {
        let limiter = SharedRateLimiter::new(1.0, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn update_replaces_the_bucket() {
        let limiter = SharedRateLimiter::new(1.0, 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        limiter.update(1.0, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
