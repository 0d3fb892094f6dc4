use std::sync::Arc;
use std::time::Duration;

use crate::services::{with_deadline, AuthError, EphemeralStore};

/// Fixed-window request throttle keyed by client identity and route.
///
/// A burst straddling a window boundary can be admitted up to twice the
/// limit across the two windows.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn EphemeralStore>,
    deadline: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn EphemeralStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    fn window_key(identity: &str, route: &str) -> String {
        format!("rate:{}:{}", identity, route)
    }

    /// Count this request against the window; `false` once the window is exhausted.
    pub async fn allow(
        &self,
        identity: &str,
        route: &str,
        limit: u64,
        window_seconds: u64,
    ) -> Result<bool, AuthError> {
        self.check(identity, route, limit, window_seconds)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                AuthError::RateLimited { .. } => Ok(false),
                other => Err(other),
            })
    }

    /// Like [`RateLimiter::allow`], but a denial becomes
    /// [`AuthError::RateLimited`] carrying the seconds left in the window.
    pub async fn check(
        &self,
        identity: &str,
        route: &str,
        limit: u64,
        window_seconds: u64,
    ) -> Result<(), AuthError> {
        let key = Self::window_key(identity, route);
        let hit = with_deadline(
            self.deadline,
            self.store.incr_bounded(&key, limit, window_seconds),
        )
        .await?;

        if hit.allowed {
            return Ok(());
        }

        tracing::warn!(
            identity = %identity,
            route = %route,
            count = hit.count,
            "Rate limit exceeded"
        );

        Err(AuthError::RateLimited {
            retry_after_seconds: hit.resets_in_seconds.max(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockEphemeralStore;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MockEphemeralStore::new()), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_per_window() {
        let limiter = limiter();

        assert!(limiter.allow("1.2.3.4", "login", 2, 5).await.unwrap());
        assert!(limiter.allow("1.2.3.4", "login", 2, 5).await.unwrap());
        assert!(!limiter.allow("1.2.3.4", "login", 2, 5).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counter() {
        let limiter = limiter();

        for _ in 0..2 {
            limiter.allow("ip", "r", 2, 5).await.unwrap();
        }
        assert!(!limiter.allow("ip", "r", 2, 5).await.unwrap());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.allow("ip", "r", 2, 5).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_and_routes_are_independent() {
        let limiter = limiter();

        assert!(limiter.allow("a", "login", 1, 5).await.unwrap());
        assert!(!limiter.allow("a", "login", 1, 5).await.unwrap());
        assert!(limiter.allow("b", "login", 1, 5).await.unwrap());
        assert!(limiter.allow("a", "signup", 1, 5).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_carries_retry_after() {
        let limiter = limiter();
        limiter.check("ip", "r", 1, 30).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        match limiter.check("ip", "r", 1, 30).await {
            Err(AuthError::RateLimited {
                retry_after_seconds,
            }) => assert_eq!(retry_after_seconds, 20),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_outage_is_not_a_denial() {
        let store = Arc::new(MockEphemeralStore::new());
        store.set_unavailable(true);
        let limiter = RateLimiter::new(store, Duration::from_secs(5));

        assert!(matches!(
            limiter.allow("ip", "r", 2, 5).await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }
}
