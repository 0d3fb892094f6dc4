use std::sync::Arc;
use std::time::Duration;

use crate::models::{TokenPurpose, User};
use crate::services::{with_deadline, AuthError, TokenCodec, UserCache, UserStore};

/// Resolves bearer access tokens to users. Read-only against the durable store.
#[derive(Clone)]
pub struct AuthenticationGuard {
    codec: TokenCodec,
    users: Arc<dyn UserStore>,
    cache: UserCache,
    deadline: Duration,
}

impl AuthenticationGuard {
    pub fn new(
        codec: TokenCodec,
        users: Arc<dyn UserStore>,
        cache: UserCache,
        deadline: Duration,
    ) -> Self {
        Self {
            codec,
            users,
            cache,
            deadline,
        }
    }

    /// Every token or lookup failure is reported as `Unauthorized`; only an
    /// unreachable store is reported differently.
    pub async fn authenticate(&self, bearer_token: &str) -> Result<User, AuthError> {
        let subject = self
            .codec
            .verify(bearer_token, TokenPurpose::Access)
            .map_err(|e| {
                tracing::debug!(reason = %e, "Access token rejected");
                AuthError::Unauthorized
            })?;

        if let Some(user) = self.cache.get(&subject).await {
            return Ok(user);
        }

        let epoch = self.cache.epoch(&subject).await;
        let user = with_deadline(self.deadline, self.users.find_user_by_email(&subject))
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if let Some(epoch) = epoch {
            self.cache.put(&user, &epoch).await;
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::{EphemeralStore, MockEphemeralStore, MockUserStore};
    use jsonwebtoken::Algorithm;
    use secrecy::SecretString;

    fn codec() -> TokenCodec {
        TokenCodec::new(&JwtConfig {
            secret: SecretString::new("guard-test-secret-guard-test-secret".to_string()),
            algorithm: Algorithm::HS256,
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            email_token_expiry_hours: 24,
        })
    }

    struct Fixture {
        guard: AuthenticationGuard,
        users: Arc<MockUserStore>,
        ephemeral: Arc<MockEphemeralStore>,
        codec: TokenCodec,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MockUserStore::new());
        let ephemeral = Arc::new(MockEphemeralStore::new());
        let deadline = Duration::from_secs(5);
        let cache = UserCache::new(ephemeral.clone(), 900, deadline);
        let codec = codec();
        Fixture {
            guard: AuthenticationGuard::new(codec.clone(), users.clone(), cache, deadline),
            users,
            ephemeral,
            codec,
        }
    }

    async fn seed(users: &MockUserStore) -> User {
        let user = User::new("a@x.com".into(), "alice".into(), "hash".into());
        users.insert_user(&user).await.unwrap();
        user
    }

    #[tokio::test]
    async fn test_valid_access_token_resolves_user() {
        let f = fixture();
        let user = seed(&f.users).await;
        let token = f.codec.issue_for("a@x.com", TokenPurpose::Access).unwrap();

        let resolved = f.guard.authenticate(&token).await.unwrap();
        assert_eq!(resolved.user_id, user.user_id);
        // Populated the cache on the way
        assert!(f.ephemeral.get("user:a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidated_user_is_reloaded() {
        let f = fixture();
        let user = seed(&f.users).await;
        let token = f.codec.issue_for("a@x.com", TokenPurpose::Access).unwrap();
        f.guard.authenticate(&token).await.unwrap();

        f.users
            .set_avatar(user.user_id, "https://cdn.example.com/a.png")
            .await
            .unwrap();
        UserCache::new(f.ephemeral.clone(), 900, Duration::from_secs(5))
            .invalidate("a@x.com")
            .await;

        let resolved = f.guard.authenticate(&token).await.unwrap();
        assert_eq!(
            resolved.avatar.as_deref(),
            Some("https://cdn.example.com/a.png")
        );
    }

    #[tokio::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let f = fixture();
        seed(&f.users).await;
        let token = f.codec.issue_for("a@x.com", TokenPurpose::Refresh).unwrap();

        assert!(matches!(
            f.guard.authenticate(&token).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_unauthorized() {
        let f = fixture();
        let token = f.codec.issue_for("ghost@x.com", TokenPurpose::Access).unwrap();

        assert!(matches!(
            f.guard.authenticate(&token).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized() {
        let f = fixture();
        seed(&f.users).await;
        let token = f
            .codec
            .issue("a@x.com", TokenPurpose::Access, chrono::Duration::seconds(-1))
            .unwrap();

        assert!(matches!(
            f.guard.authenticate(&token).await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_store_outage_never_authenticates() {
        let f = fixture();
        seed(&f.users).await;
        f.users.set_unavailable(true);
        let token = f.codec.issue_for("a@x.com", TokenPurpose::Access).unwrap();

        assert!(matches!(
            f.guard.authenticate(&token).await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let f = fixture();
        seed(&f.users).await;
        f.ephemeral.set_unavailable(true);
        let token = f.codec.issue_for("a@x.com", TokenPurpose::Access).unwrap();

        assert!(f.guard.authenticate(&token).await.is_ok());
    }
}
