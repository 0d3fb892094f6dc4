use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::User;
use crate::services::{with_deadline, EphemeralStore};
use crate::utils::normalize_email;

/// Short-lived copy of resolved users in the ephemeral store.
///
/// Entries never carry the password hash or refresh token. Every failure
/// here is logged and treated as a miss, so the durable store stays the
/// source of truth.
///
/// Each invalidation also rewrites a per-address epoch marker. A reader takes
/// the epoch before loading from the durable store and hands it back to
/// [`UserCache::put`]; if an invalidation landed in between, the copy it
/// loaded is dropped instead of outliving the change.
#[derive(Clone)]
pub struct UserCache {
    store: Arc<dyn EphemeralStore>,
    ttl_seconds: u64,
    deadline: Duration,
}

/// Invalidation marker observed before a durable read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEpoch(Option<String>);

impl UserCache {
    pub fn new(store: Arc<dyn EphemeralStore>, ttl_seconds: u64, deadline: Duration) -> Self {
        Self {
            store,
            ttl_seconds,
            deadline,
        }
    }

    pub fn key(email: &str) -> String {
        format!("user:{}", normalize_email(email))
    }

    fn epoch_key(email: &str) -> String {
        format!("user_epoch:{}", normalize_email(email))
    }

    fn enabled(&self) -> bool {
        self.ttl_seconds > 0
    }

    pub async fn get(&self, email: &str) -> Option<User> {
        if !self.enabled() {
            return None;
        }

        let raw = with_deadline(self.deadline, self.store.get(&Self::key(email)))
            .await
            .ok()??;

        match serde_json::from_str::<User>(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable user cache entry");
                None
            }
        }
    }

    /// Current epoch for an address, or `None` when it cannot be read (the
    /// caller then skips filling the cache).
    pub async fn epoch(&self, email: &str) -> Option<CacheEpoch> {
        if !self.enabled() {
            return None;
        }

        with_deadline(self.deadline, self.store.get(&Self::epoch_key(email)))
            .await
            .ok()
            .map(CacheEpoch)
    }

    /// Cache a user loaded while `seen` was the current epoch.
    pub async fn put(&self, user: &User, seen: &CacheEpoch) {
        if !self.enabled() {
            return;
        }

        let raw = match serde_json::to_string(user) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user.user_id, "Failed to serialize user for cache");
                return;
            }
        };

        let key = Self::key(&user.email);
        if let Err(e) = with_deadline(
            self.deadline,
            self.store.put(&key, &raw, self.ttl_seconds),
        )
        .await
        {
            tracing::warn!(error = %e, user_id = %user.user_id, "Failed to cache user");
            return;
        }

        // Checked after the write: an invalidation either shows up here or
        // deletes the entry itself afterwards
        if self.epoch(&user.email).await.as_ref() != Some(seen) {
            tracing::debug!(user_id = %user.user_id, "User changed while loading, dropping cached copy");
            if let Err(e) = with_deadline(self.deadline, self.store.delete(&key)).await {
                tracing::warn!(error = %e, user_id = %user.user_id, "Failed to drop stale cached user");
            }
        }
    }

    pub async fn invalidate(&self, email: &str) {
        if self.enabled() {
            let marker = Uuid::new_v4().to_string();
            if let Err(e) = with_deadline(
                self.deadline,
                self.store
                    .put(&Self::epoch_key(email), &marker, self.ttl_seconds),
            )
            .await
            {
                tracing::warn!(error = %e, "Failed to advance user cache epoch");
            }
        }

        if let Err(e) = with_deadline(self.deadline, self.store.delete(&Self::key(email))).await {
            tracing::warn!(error = %e, "Failed to invalidate cached user");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MockEphemeralStore;

    fn cache(ttl: u64) -> (UserCache, Arc<MockEphemeralStore>) {
        let store = Arc::new(MockEphemeralStore::new());
        (
            UserCache::new(store.clone(), ttl, Duration::from_secs(5)),
            store,
        )
    }

    fn user() -> User {
        let mut user = User::new(
            "a@x.com".to_string(),
            "alice".to_string(),
            "$argon2id$secret".to_string(),
        );
        user.refresh_token = Some("refresh".to_string());
        user
    }

    async fn fill(cache: &UserCache, user: &User) {
        let epoch = cache.epoch(&user.email).await.unwrap();
        cache.put(user, &epoch).await;
    }

    #[tokio::test]
    async fn test_cached_user_has_no_secrets() {
        let (cache, store) = cache(900);
        fill(&cache, &user()).await;

        let raw = store.get("user:a@x.com").await.unwrap().unwrap();
        assert!(!raw.contains("argon2"));
        assert!(!raw.contains("refresh"));

        let cached = cache.get("A@X.com").await.unwrap();
        assert_eq!(cached.email, "a@x.com");
        assert!(cached.password_hash.is_empty());
        assert!(cached.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let (cache, _) = cache(900);
        fill(&cache, &user()).await;
        cache.invalidate("a@x.com").await;
        assert!(cache.get("a@x.com").await.is_none());
    }

    #[tokio::test]
    async fn test_copy_loaded_before_invalidation_is_not_kept() {
        let (cache, _) = cache(900);
        let epoch = cache.epoch("a@x.com").await.unwrap();

        // The record changes while the stale copy is in flight
        cache.invalidate("a@x.com").await;
        cache.put(&user(), &epoch).await;

        assert!(cache.get("a@x.com").await.is_none());

        // A reader that starts afterwards fills normally
        fill(&cache, &user()).await;
        assert!(cache.get("a@x.com").await.is_some());
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_cache() {
        let (cache, store) = cache(0);
        assert!(cache.epoch("a@x.com").await.is_none());
        cache.put(&user(), &CacheEpoch(None)).await;
        cache.invalidate("a@x.com").await;
        assert!(store.is_empty());
        assert!(cache.get("a@x.com").await.is_none());
    }

    #[tokio::test]
    async fn test_outage_is_a_miss() {
        let (cache, store) = cache(900);
        fill(&cache, &user()).await;
        store.set_unavailable(true);
        assert!(cache.get("a@x.com").await.is_none());
        assert!(cache.epoch("a@x.com").await.is_none());
    }
}
