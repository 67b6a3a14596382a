//! Expiring key-value records for in-flight lookups.
//!
//! Pending markers and resolution results live here rather than in
//! the relational tables; they carry a TTL and disappear on their own
//! once nobody can act on them any more. Expiry is lazy, applied when
//! a key is read. Publication is an advisory in-process broadcast;
//! dropped notifications are harmless because every state transition
//! is also observable by polling.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

#[async_trait]
pub trait LookupCache: Send + Sync {
    /// Store `value` under `key` for `ttl_secs` seconds, replacing any
    /// previous value and its deadline.
    async fn set(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()>;

    /// Fetch a live value. Expired entries are dropped and read as
    /// absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Advisory broadcast to in-process subscribers.
    fn publish(&self, channel: &str, payload: &str);

    fn subscribe(&self) -> broadcast::Receiver<(String, String)>;
}

// ============ SQLite implementation ============

pub struct SqliteCache {
    pool: SqlitePool,
    notify: broadcast::Sender<(String, String)>,
}

impl SqliteCache {
    pub fn new(pool: SqlitePool) -> Self {
        let (notify, _) = broadcast::channel(64);
        Self { pool, notify }
    }
}

#[async_trait]
impl LookupCache for SqliteCache {
    async fn set(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        let expires_at = (Utc::now() + Duration::seconds(ttl_secs)).to_rfc3339();
        sqlx::query(
            "INSERT INTO lookup_cache (key, value, expires_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
             expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, expires_at FROM lookup_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let expires_at = row.get::<String, _>("expires_at");
        let live = DateTime::parse_from_rfc3339(&expires_at)
            .map(|deadline| deadline.with_timezone(&Utc) > Utc::now())
            .unwrap_or(false);
        if !live {
            self.delete(key).await?;
            return Ok(None);
        }
        Ok(Some(row.get("value")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM lookup_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn publish(&self, channel: &str, payload: &str) {
        // No receivers is fine; the broadcast is best effort
        let _ = self.notify.send((channel.to_string(), payload.to_string()));
    }

    fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.notify.subscribe()
    }
}

// ============ In-memory implementation for tests ============
