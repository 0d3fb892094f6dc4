//! User model - account record owned by the durable store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::normalize_email;

/// User entity.
///
/// The password hash and the live refresh token never leave the service:
/// both are skipped when the record is serialized (e.g. into the user cache).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub confirmed: bool,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub avatar: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create a new, unconfirmed user with a Gravatar default avatar.
    pub fn new(email: String, username: String, password_hash: String) -> Self {
        let avatar = Some(gravatar_url(&email));
        Self {
            user_id: Uuid::new_v4(),
            email,
            username,
            password_hash,
            confirmed: false,
            refresh_token: None,
            avatar,
            created_utc: Utc::now(),
        }
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// Gravatar identicon URL for an address (SHA-256 of the normalized email).
pub fn gravatar_url(email: &str) -> String {
    let digest = Sha256::digest(normalize_email(email).as_bytes());
    format!(
        "https://www.gravatar.com/avatar/{}?d=identicon",
        hex::encode(digest)
    )
}

/// User response for API (without sensitive fields).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub user_id: Uuid,
    #[schema(example = "alice@example.com")]
    pub email: String,
    #[schema(example = "alice")]
    pub username: String,
    pub confirmed: bool,
    pub avatar: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email,
            username: u.username,
            confirmed: u.confirmed,
            avatar: u.avatar,
            created_utc: u.created_utc,
        }
    }
}
