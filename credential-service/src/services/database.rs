//! Durable user store: PostgreSQL via sqlx, plus an in-memory double.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::User;

/// Unique-constraint violation code in PostgreSQL.
const UNIQUE_VIOLATION: &str = "23505";

/// Account records, keyed by email (compared case-insensitively).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;

    /// Returns `false` when an account with the same email already exists.
    async fn insert_user(&self, user: &User) -> Result<bool, anyhow::Error>;

    async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), anyhow::Error>;

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        token: Option<&str>,
    ) -> Result<(), anyhow::Error>;

    /// Replace the stored refresh token only if it still equals `expected`.
    /// Returns whether the swap happened; of two concurrent callers holding
    /// the same token at most one wins.
    async fn swap_refresh_token(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn set_confirmed(&self, user_id: Uuid) -> Result<(), anyhow::Error>;

    async fn set_avatar(&self, user_id: Uuid, avatar: &str) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    async fn insert_user(&self, user: &User) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, email, username, password_hash, confirmed, refresh_token, avatar, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.confirmed)
        .bind(&user.refresh_token)
        .bind(&user.avatar)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Ok(false)
            }
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }

    async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
            .bind(hash)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        token: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET refresh_token = $1 WHERE user_id = $2")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $1 WHERE user_id = $2 AND refresh_token = $3",
        )
        .bind(replacement)
        .bind(user_id)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_confirmed(&self, user_id: Uuid) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET confirmed = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn set_avatar(&self, user_id: Uuid, avatar: &str) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE users SET avatar = $1 WHERE user_id = $2")
            .bind(avatar)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                anyhow::anyhow!("Database health check failed: {}", e)
            })?;
        Ok(())
    }
}

/// In-memory user store for tests and local runs.
#[derive(Default)]
pub struct MockUserStore {
    users: Mutex<HashMap<Uuid, User>>,
    unavailable: AtomicBool,
}

impl MockUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_users<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Uuid, User>) -> T,
    ) -> Result<T, anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock user store unavailable"));
        }
        let mut users = self
            .users
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock user store mutex poisoned: {}", e))?;
        Ok(f(&mut users))
    }

    fn update(&self, user_id: Uuid, f: impl FnOnce(&mut User)) -> Result<(), anyhow::Error> {
        self.with_users(|users| {
            if let Some(user) = users.get_mut(&user_id) {
                f(user);
            }
        })
    }
}

#[async_trait]
impl UserStore for MockUserStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        self.with_users(|users| {
            users
                .values()
                .find(|u| u.email.eq_ignore_ascii_case(email))
                .cloned()
        })
    }

    async fn insert_user(&self, user: &User) -> Result<bool, anyhow::Error> {
        self.with_users(|users| {
            if users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
                return false;
            }
            users.insert(user.user_id, user.clone());
            true
        })
    }

    async fn set_password_hash(&self, user_id: Uuid, hash: &str) -> Result<(), anyhow::Error> {
        self.update(user_id, |u| u.password_hash = hash.to_string())
    }

    async fn set_refresh_token(
        &self,
        user_id: Uuid,
        token: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        self.update(user_id, |u| u.refresh_token = token.map(str::to_string))
    }

    async fn swap_refresh_token(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, anyhow::Error> {
        self.with_users(|users| match users.get_mut(&user_id) {
            Some(user) if user.refresh_token.as_deref() == Some(expected) => {
                user.refresh_token = Some(replacement.to_string());
                true
            }
            _ => false,
        })
    }

    async fn set_confirmed(&self, user_id: Uuid) -> Result<(), anyhow::Error> {
        self.update(user_id, |u| u.confirmed = true)
    }

    async fn set_avatar(&self, user_id: Uuid, avatar: &str) -> Result<(), anyhow::Error> {
        self.update(user_id, |u| u.avatar = Some(avatar.to_string()))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.with_users(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> User {
        User::new(email.to_string(), "alice".to_string(), "hash".to_string())
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let store = MockUserStore::new();
        assert!(store.insert_user(&user("Alice@Example.com")).await.unwrap());

        let found = store.find_user_by_email("alice@example.com").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MockUserStore::new();
        assert!(store.insert_user(&user("a@x.com")).await.unwrap());
        assert!(!store.insert_user(&user("A@X.COM")).await.unwrap());
    }

    #[tokio::test]
    async fn test_swap_refresh_token_is_conditional() {
        let store = MockUserStore::new();
        let u = user("a@x.com");
        store.insert_user(&u).await.unwrap();
        store.set_refresh_token(u.user_id, Some("r1")).await.unwrap();

        assert!(store.swap_refresh_token(u.user_id, "r1", "r2").await.unwrap());
        // r1 is no longer current
        assert!(!store.swap_refresh_token(u.user_id, "r1", "r3").await.unwrap());

        let stored = store.find_user_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_swap_fails_when_no_token_stored() {
        let store = MockUserStore::new();
        let u = user("a@x.com");
        store.insert_user(&u).await.unwrap();

        assert!(!store.swap_refresh_token(u.user_id, "r1", "r2").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MockUserStore::new();
        store.set_unavailable(true);
        assert!(store.find_user_by_email("a@x.com").await.is_err());
        assert!(store.health_check().await.is_err());
    }
}
