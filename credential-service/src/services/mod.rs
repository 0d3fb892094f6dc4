//! Authentication core and the adapters it depends on.

mod cache;
mod credentials;
mod database;
mod email;
pub mod error;
mod guard;
mod rate_limiter;
pub mod redis;
mod token;

use std::future::Future;
use std::time::Duration;

pub use cache::{CacheEpoch, UserCache};
pub use credentials::{ConfirmationOutcome, CredentialService, ResendOutcome};
pub use database::{Database, MockUserStore, UserStore};
pub use email::{
    confirmation_link, reset_link, EmailProvider, EmailService, MailKind, MockEmailService,
    RecordingEmailService, SentMail,
};
pub use error::AuthError;
pub use guard::AuthenticationGuard;
pub use rate_limiter::RateLimiter;
pub use self::redis::{EphemeralStore, MockEphemeralStore, RedisStore, WindowHit};
pub use token::TokenCodec;

/// Await a store call under a deadline. Both an adapter error and an elapsed
/// deadline become [`AuthError::StoreUnavailable`].
pub(crate) async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, anyhow::Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Store call failed");
            Err(AuthError::store(e))
        }
        Err(_) => {
            tracing::error!(timeout_ms = deadline.as_millis() as u64, "Store call timed out");
            Err(AuthError::store("store call timed out"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_deadline_is_store_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, anyhow::Error>(())
        };

        assert!(matches!(
            with_deadline(Duration::from_secs(1), slow).await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_adapter_error_is_store_unavailable() {
        let failing = async { Err::<(), _>(anyhow::anyhow!("connection refused")) };

        match with_deadline(Duration::from_secs(1), failing).await {
            Err(AuthError::StoreUnavailable(reason)) => assert!(reason.contains("refused")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
