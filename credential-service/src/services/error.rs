use service_core::error::AppError;
use thiserror::Error;

/// Seconds a client should wait before retrying after a store outage.
const STORE_RETRY_AFTER_SECONDS: u64 = 1;

/// Outcome kinds of every credential operation.
///
/// Everything except [`AuthError::StoreUnavailable`] is recoverable by the
/// caller (log in again, request a new reset token, ...).
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Account already exists")]
    DuplicateAccount,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token used for the wrong purpose")]
    WrongPurpose,

    #[error("Unknown token subject")]
    UnknownSubject,

    #[error("Refresh token reuse detected")]
    TokenReuseDetected,

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Current password is not correct")]
    IncorrectCurrentPassword,

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Too many requests")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AuthError {
    /// Wrap an adapter failure. Used for both I/O errors and deadline expiry.
    pub fn store(err: impl std::fmt::Display) -> Self {
        AuthError::StoreUnavailable(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let msg = err.to_string();
        match err {
            AuthError::DuplicateAccount => AppError::Conflict(anyhow::anyhow!(msg)),
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired
            | AuthError::WrongPurpose
            | AuthError::UnknownSubject
            | AuthError::TokenReuseDetected
            | AuthError::Unauthorized => AppError::Unauthorized(anyhow::anyhow!(msg)),
            AuthError::EmailNotConfirmed => AppError::Forbidden(anyhow::anyhow!(msg)),
            AuthError::PasswordMismatch
            | AuthError::IncorrectCurrentPassword
            | AuthError::InvalidOrExpiredToken => AppError::BadRequest(anyhow::anyhow!(msg)),
            AuthError::RateLimited {
                retry_after_seconds,
            } => AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(retry_after_seconds),
            ),
            AuthError::StoreUnavailable(reason) => {
                AppError::ServiceUnavailable(reason, Some(STORE_RETRY_AFTER_SECONDS))
            }
        }
    }
}
