use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Result of one step of a fixed-window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    pub allowed: bool,
    pub count: u64,
    /// Seconds until the window (and its counter) expires.
    pub resets_in_seconds: u64,
}

/// Low-latency key/value service with per-key expiry.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Upsert with expiry; overwrites silently.
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;

    /// Read without side effects.
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Idempotent: deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;

    /// Atomically: create the counter at 1 with `ttl_seconds` if absent,
    /// increment it while below `ceiling`, otherwise leave it untouched and
    /// report a denial.
    async fn incr_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl_seconds: u64,
    ) -> Result<WindowHit, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

const INCR_BOUNDED_LUA: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    redis.call('SET', KEYS[1], 1, 'EX', ARGV[2])
    return {1, 1, tonumber(ARGV[2])}
end
local ttl = redis.call('TTL', KEYS[1])
if ttl < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    ttl = tonumber(ARGV[2])
end
local count = tonumber(current)
if count >= tonumber(ARGV[1]) then
    return {0, count, ttl}
end
count = redis.call('INCR', KEYS[1])
return {1, count, ttl}
"#;

/// Redis-backed store. The connection is opened once at startup and shared;
/// `ConnectionManager` reconnects transparently afterwards.
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    manager: ConnectionManager,
    incr_bounded: Script,
}

impl RedisStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            incr_bounded: Script::new(INCR_BOUNDED_LUA),
        })
    }
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        let _removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))?;
        Ok(())
    }

    async fn incr_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl_seconds: u64,
    ) -> Result<WindowHit, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (allowed, count, ttl): (i64, i64, i64) = self
            .incr_bounded
            .key(key)
            .arg(ceiling)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to step rate window: {}", e))?;

        Ok(WindowHit {
            allowed: allowed == 1,
            count: count.max(0) as u64,
            resets_in_seconds: ttl.max(0) as u64,
        })
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process store honouring TTLs against the tokio clock, so tests can pause
/// and advance time. Can be switched into an "unavailable" state.
pub struct MockEphemeralStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    unavailable: AtomicBool,
}

impl Default for MockEphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEphemeralStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|(_, exp)| *exp > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), anyhow::Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock ephemeral store unavailable"));
        }
        Ok(())
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, anyhow::Error> {
        self.check_available()?;
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock ephemeral store mutex poisoned: {}", e))
    }
}

#[async_trait]
impl EphemeralStore for MockEphemeralStore {
    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds);
        self.lock()?
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let now = Instant::now();
        let value = self
            .lock()?
            .get(key)
            .filter(|(_, exp)| *exp > now)
            .map(|(value, _)| value.clone());
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn incr_bounded(
        &self,
        key: &str,
        ceiling: u64,
        ttl_seconds: u64,
    ) -> Result<WindowHit, anyhow::Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        let live = entries
            .get(key)
            .filter(|(_, exp)| *exp > now)
            .and_then(|(value, exp)| value.parse::<u64>().ok().map(|count| (count, *exp)));

        let hit = match live {
            None => {
                let expires_at = now + Duration::from_secs(ttl_seconds);
                entries.insert(key.to_string(), ("1".to_string(), expires_at));
                WindowHit {
                    allowed: true,
                    count: 1,
                    resets_in_seconds: ttl_seconds,
                }
            }
            Some((count, expires_at)) => {
                let resets_in_seconds = expires_at.saturating_duration_since(now).as_secs();
                if count >= ceiling {
                    WindowHit {
                        allowed: false,
                        count,
                        resets_in_seconds,
                    }
                } else {
                    let count = count + 1;
                    entries.insert(key.to_string(), (count.to_string(), expires_at));
                    WindowHit {
                        allowed: true,
                        count,
                        resets_in_seconds,
                    }
                }
            }
        };

        Ok(hit)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MockEphemeralStore::new();

        store.put("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.put("k", "v2", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        // Deleting twice is fine
        store.delete("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = MockEphemeralStore::new();
        store.put("k", "v", 900).await.unwrap();

        tokio::time::advance(Duration::from_secs(899)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_bounded_stops_at_ceiling() {
        let store = MockEphemeralStore::new();

        let first = store.incr_bounded("w", 2, 5).await.unwrap();
        let second = store.incr_bounded("w", 2, 5).await.unwrap();
        let third = store.incr_bounded("w", 2, 5).await.unwrap();
        let fourth = store.incr_bounded("w", 2, 5).await.unwrap();

        assert!(first.allowed && second.allowed);
        assert!(!third.allowed && !fourth.allowed);
        // Exhausted windows are not incremented further
        assert_eq!(fourth.count, 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        let fresh = store.incr_bounded("w", 2, 5).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MockEphemeralStore::new();
        store.set_unavailable(true);

        assert!(store.get("k").await.is_err());
        assert!(store.put("k", "v", 1).await.is_err());
        assert!(store.health_check().await.is_err());
    }
}
