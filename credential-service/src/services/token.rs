use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{TokenClaims, TokenPair, TokenPurpose};
use crate::services::AuthError;

const DEFAULT_PASSWORD_RESET_TTL_SECONDS: i64 = 900;

/// Signs and verifies compact tokens for every purpose with one shared secret.
///
/// The purpose travels inside the signed claims, so sharing the key never lets
/// an access token stand in for a refresh token (or the other way round).
#[derive(Clone)]
pub struct TokenCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    email_verification_ttl: Duration,
    password_reset_ttl: Duration,
}

impl TokenCodec {
    pub fn new(config: &JwtConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();

        tracing::info!(algorithm = ?config.algorithm, "Token codec initialized");

        Self {
            algorithm: config.algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
            email_verification_ttl: Duration::hours(config.email_token_expiry_hours),
            password_reset_ttl: Duration::seconds(DEFAULT_PASSWORD_RESET_TTL_SECONDS),
        }
    }

    /// Lifetime of signed password-reset tokens. Issued reset links carry
    /// opaque store-backed tokens instead; this keeps the signed form in step
    /// with them.
    pub fn with_password_reset_ttl(mut self, seconds: u64) -> Self {
        // chrono caps durations at i64::MAX milliseconds
        let seconds = seconds.min(i64::MAX as u64 / 1_000) as i64;
        self.password_reset_ttl = Duration::seconds(seconds);
        self
    }

    /// Configured lifetime for a purpose.
    pub fn ttl_for(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::Access => self.access_ttl,
            TokenPurpose::Refresh => self.refresh_ttl,
            TokenPurpose::EmailVerification => self.email_verification_ttl,
            TokenPurpose::PasswordReset => self.password_reset_ttl,
        }
    }

    /// Build and sign `{sub, purpose, iat, exp, jti}`.
    pub fn issue(
        &self,
        subject: &str,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: subject.to_string(),
            purpose,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, purpose = %purpose, "Failed to encode token");
            AuthError::InvalidToken
        })
    }

    /// Issue with the configured lifetime for `purpose`.
    pub fn issue_for(&self, subject: &str, purpose: TokenPurpose) -> Result<String, AuthError> {
        self.issue(subject, purpose, self.ttl_for(purpose))
    }

    /// Fresh access + refresh pair for a subject.
    pub fn issue_pair(&self, subject: &str) -> Result<TokenPair, AuthError> {
        let access_token = self.issue_for(subject, TokenPurpose::Access)?;
        let refresh_token = self.issue_for(subject, TokenPurpose::Refresh)?;
        Ok(TokenPair::new(access_token, refresh_token))
    }

    /// Verify signature, expiry and purpose; return the subject.
    ///
    /// Pure computation: no I/O, never suspends.
    pub fn verify(&self, token: &str, expected: TokenPurpose) -> Result<String, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                // Includes bad signatures: tampered and malformed tokens are
                // reported identically.
                _ => AuthError::InvalidToken,
            }
        })?;

        if data.claims.purpose != expected {
            tracing::debug!(
                expected = %expected,
                actual = %data.claims.purpose,
                "Token presented for the wrong purpose"
            );
            return Err(AuthError::WrongPurpose);
        }

        Ok(data.claims.sub)
    }
}
