//! Account and session lifecycle: signup, login, token rotation, email
//! confirmation and password recovery.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::models::{TokenPair, TokenPurpose, User};
use crate::services::{
    with_deadline, AuthError, EmailProvider, EphemeralStore, TokenCodec, UserCache, UserStore,
};
use crate::utils::{hash_password, normalize_email, verify_password};

/// Random bytes behind each password-reset token.
const RESET_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed,
    AlreadyConfirmed,
}

/// Result of asking for another confirmation email. Unknown addresses get
/// `Dispatched` too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    Dispatched,
    AlreadyConfirmed,
}

#[derive(Clone)]
pub struct CredentialService {
    users: Arc<dyn UserStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    email: Arc<dyn EmailProvider>,
    codec: TokenCodec,
    cache: UserCache,
    session: SessionConfig,
    public_base_url: String,
}

impl CredentialService {
    pub fn new(
        users: Arc<dyn UserStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        email: Arc<dyn EmailProvider>,
        codec: TokenCodec,
        session: SessionConfig,
        public_base_url: String,
    ) -> Self {
        let cache = UserCache::new(
            ephemeral.clone(),
            session.user_cache_ttl_seconds,
            session.store_timeout(),
        );

        Self {
            users,
            ephemeral,
            email,
            codec,
            cache,
            session,
            public_base_url,
        }
    }

    fn deadline(&self) -> Duration {
        self.session.store_timeout()
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, anyhow::Error>>,
    ) -> Result<T, AuthError> {
        with_deadline(self.deadline(), fut).await
    }

    async fn find_user(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.bounded(self.users.find_user_by_email(&normalize_email(email)))
            .await
    }

    fn reset_key(token: &str) -> String {
        format!("password_reset:{}", token)
    }

    fn generate_reset_token() -> String {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn hash(plaintext: &str) -> Result<String, AuthError> {
        hash_password(plaintext).map_err(|e| {
            tracing::error!(error = %e, "Password hashing failed");
            AuthError::store(e)
        })
    }

    fn dispatch_verification(&self, user: &User) -> Result<(), AuthError> {
        let token = self
            .codec
            .issue_for(&user.email, TokenPurpose::EmailVerification)?;

        let email = self.email.clone();
        let to = user.email.clone();
        let username = user.username.clone();
        let base_url = self.public_base_url.clone();
        tokio::spawn(async move {
            if let Err(e) = email.send_verification(&to, &username, &base_url, &token).await {
                tracing::error!(error = %e, to = %to, "Failed to send verification email");
            }
        });

        Ok(())
    }

    fn dispatch_password_reset(&self, user: &User, token: String) {
        let email = self.email.clone();
        let to = user.email.clone();
        let username = user.username.clone();
        let base_url = self.public_base_url.clone();
        tokio::spawn(async move {
            if let Err(e) = email
                .send_password_reset(&to, &username, &base_url, &token)
                .await
            {
                tracing::error!(error = %e, to = %to, "Failed to send password reset email");
            }
        });
    }

    /// Create an unconfirmed account and send its confirmation link.
    pub async fn signup(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let email = normalize_email(email);

        if self.find_user(&email).await?.is_some() {
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = Self::hash(password)?;
        let user = User::new(email, username.to_string(), password_hash);

        // A concurrent signup can still win between the lookup and the insert
        if !self.bounded(self.users.insert_user(&user)).await? {
            return Err(AuthError::DuplicateAccount);
        }

        tracing::info!(user_id = %user.user_id, "User signed up");

        self.dispatch_verification(&user)?;
        Ok(user)
    }

    /// Check credentials and start a new session, replacing any previous one.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AuthError> {
        let user = self
            .find_user(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.confirmed {
            return Err(AuthError::EmailNotConfirmed);
        }

        if !verify_password(password, &user.password_hash) {
            tracing::warn!(user_id = %user.user_id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let pair = self.codec.issue_pair(&user.email)?;
        self.bounded(
            self.users
                .set_refresh_token(user.user_id, Some(&pair.refresh_token)),
        )
        .await?;

        tracing::info!(user_id = %user.user_id, "User logged in");
        Ok(pair)
    }

    /// Rotate a session. A refresh token that is no longer the stored one
    /// revokes the session entirely.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let subject = self
            .codec
            .verify(refresh_token, TokenPurpose::Refresh)
            .map_err(|_| AuthError::InvalidToken)?;

        let user = self
            .find_user(&subject)
            .await?
            .ok_or(AuthError::UnknownSubject)?;

        let pair = self.codec.issue_pair(&user.email)?;
        let rotated = self
            .bounded(self.users.swap_refresh_token(
                user.user_id,
                refresh_token,
                &pair.refresh_token,
            ))
            .await?;

        if !rotated {
            tracing::warn!(user_id = %user.user_id, "Refresh token reuse detected, revoking session");
            self.bounded(self.users.set_refresh_token(user.user_id, None))
                .await?;
            return Err(AuthError::TokenReuseDetected);
        }

        tracing::debug!(user_id = %user.user_id, "Session rotated");
        Ok(pair)
    }

    /// End the current session.
    pub async fn logout(&self, user: &User) -> Result<(), AuthError> {
        self.bounded(self.users.set_refresh_token(user.user_id, None))
            .await?;
        tracing::info!(user_id = %user.user_id, "User logged out");
        Ok(())
    }

    pub async fn confirm_email(&self, token: &str) -> Result<ConfirmationOutcome, AuthError> {
        let subject = self
            .codec
            .verify(token, TokenPurpose::EmailVerification)
            .map_err(|_| AuthError::InvalidToken)?;

        let user = self
            .find_user(&subject)
            .await?
            .ok_or(AuthError::UnknownSubject)?;

        if user.confirmed {
            return Ok(ConfirmationOutcome::AlreadyConfirmed);
        }

        self.bounded(self.users.set_confirmed(user.user_id)).await?;
        self.cache.invalidate(&user.email).await;

        tracing::info!(user_id = %user.user_id, "Email confirmed");
        Ok(ConfirmationOutcome::Confirmed)
    }

    /// Send a fresh confirmation link to an unconfirmed account.
    pub async fn resend_confirmation(&self, email: &str) -> Result<ResendOutcome, AuthError> {
        match self.find_user(email).await? {
            Some(user) if user.confirmed => Ok(ResendOutcome::AlreadyConfirmed),
            Some(user) => {
                self.dispatch_verification(&user)?;
                Ok(ResendOutcome::Dispatched)
            }
            None => Ok(ResendOutcome::Dispatched),
        }
    }

    /// Issue a single-use reset token for the account, if it exists. The
    /// caller sees the same result either way.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.find_user(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = Self::generate_reset_token();
        self.bounded(self.ephemeral.put(
            &Self::reset_key(&token),
            &user.email,
            self.session.password_reset_ttl_seconds,
        ))
        .await?;

        tracing::info!(user_id = %user.user_id, "Password reset requested");
        self.dispatch_password_reset(&user, token);
        Ok(())
    }

    /// Redeem a reset token.
    ///
    /// Two concurrent redemptions of one token may both land before the
    /// delete; each writes a hash of the password it was given.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        if new_password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }

        let key = Self::reset_key(token);
        let email = self
            .bounded(self.ephemeral.get(&key))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let user = self
            .find_user(&email)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let password_hash = Self::hash(new_password)?;
        self.bounded(self.users.set_password_hash(user.user_id, &password_hash))
            .await?;
        self.bounded(self.ephemeral.delete(&key)).await?;
        self.cache.invalidate(&user.email).await;

        tracing::info!(user_id = %user.user_id, "Password reset completed");
        Ok(())
    }

    /// Change the password of an authenticated user. The active session
    /// stays valid.
    pub async fn set_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        if new_password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }

        // The guard may have served a cached copy without the hash
        let stored = self
            .find_user(&user.email)
            .await?
            .ok_or(AuthError::Unauthorized)?;

        if !verify_password(current_password, &stored.password_hash) {
            return Err(AuthError::IncorrectCurrentPassword);
        }

        let password_hash = Self::hash(new_password)?;
        self.bounded(self.users.set_password_hash(stored.user_id, &password_hash))
            .await?;
        self.cache.invalidate(&stored.email).await;

        tracing::info!(user_id = %stored.user_id, "Password changed");
        Ok(())
    }

    pub async fn update_avatar(&self, user: &User, avatar_url: &str) -> Result<User, AuthError> {
        self.bounded(self.users.set_avatar(user.user_id, avatar_url))
            .await?;
        self.cache.invalidate(&user.email).await;

        let mut updated = user.clone();
        updated.avatar = Some(avatar_url.to_string());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use crate::services::{MockEmailService, MockEphemeralStore, MockUserStore};
    use jsonwebtoken::Algorithm;
    use secrecy::SecretString;

    fn codec() -> TokenCodec {
        TokenCodec::new(&JwtConfig {
            secret: SecretString::new("unit-test-secret-unit-test-secret".to_string()),
            algorithm: Algorithm::HS256,
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            email_token_expiry_hours: 24,
        })
    }

    fn service() -> (CredentialService, Arc<MockUserStore>, Arc<MockEphemeralStore>) {
        let users = Arc::new(MockUserStore::new());
        let ephemeral = Arc::new(MockEphemeralStore::new());
        let service = CredentialService::new(
            users.clone(),
            ephemeral.clone(),
            Arc::new(MockEmailService),
            codec(),
            SessionConfig::default(),
            "http://localhost:8000".to_string(),
        );
        (service, users, ephemeral)
    }

    #[test]
    fn test_reset_tokens_are_url_safe_and_long() {
        let token = CredentialService::generate_reset_token();
        // 32 bytes, unpadded base64
        assert_eq!(token.len(), 43);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, CredentialService::generate_reset_token());
    }

    #[tokio::test]
    async fn test_signup_normalizes_email_and_starts_unconfirmed() {
        let (service, users, _) = service();
        let user = service
            .signup("  A@x.com ", "alice", "pw123456")
            .await
            .unwrap();

        assert_eq!(user.email, "a@x.com");
        assert!(!user.confirmed);
        assert!(user.avatar.unwrap().contains("gravatar.com"));
        assert!(users.find_user_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_unknown_email_is_generic() {
        let (service, _, _) = service();
        assert!(matches!(
            service.login("nobody@x.com", "pw").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_every_entry_point_normalizes_email() {
        let (service, users, ephemeral) = service();
        let user = service.signup("a@x.com", "alice", "pw123456").await.unwrap();

        assert_eq!(
            service.resend_confirmation(" A@X.com ").await.unwrap(),
            ResendOutcome::Dispatched
        );

        users.set_confirmed(user.user_id).await.unwrap();
        assert!(service.login(" A@X.com ", "pw123456").await.is_ok());
        assert_eq!(
            service.resend_confirmation("\tA@x.COM").await.unwrap(),
            ResendOutcome::AlreadyConfirmed
        );

        service.request_password_reset(" A@X.COM ").await.unwrap();
        assert_eq!(ephemeral.len(), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_refresh_token() {
        let (service, users, _) = service();
        let user = service.signup("a@x.com", "alice", "pw123456").await.unwrap();
        users.set_confirmed(user.user_id).await.unwrap();
        let pair = service.login("a@x.com", "pw123456").await.unwrap();

        service.logout(&user).await.unwrap();

        let stored = users.find_user_by_email("a@x.com").await.unwrap().unwrap();
        assert!(stored.refresh_token.is_none());
        assert!(matches!(
            service.refresh(&pair.refresh_token).await,
            Err(AuthError::TokenReuseDetected)
        ));
    }

    #[tokio::test]
    async fn test_reset_entry_expires_with_store_ttl() {
        tokio::time::pause();
        let (service, users, ephemeral) = service();
        let user = User::new("a@x.com".into(), "alice".into(), "x".into());
        users.insert_user(&user).await.unwrap();

        ephemeral
            .put(&CredentialService::reset_key("tok"), "a@x.com", 900)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(901)).await;

        assert!(matches!(
            service.reset_password("tok", "new-pass", "new-pass").await,
            Err(AuthError::InvalidOrExpiredToken)
        ));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_unavailable() {
        let (service, users, _) = service();
        users.set_unavailable(true);

        assert!(matches!(
            service.login("a@x.com", "pw").await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }
}
