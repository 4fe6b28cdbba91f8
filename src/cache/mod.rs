//! # Queue Cache Module
//!
//! Redis mirror of per-event queue state: waiting/entered counters
//! and the ordered waiting set. The mirror exists for cheap reads
//! and statistics only.
//!
//! ## Keys
//!
//! - `queue:{event_id}:waiting` (zset) - rank -> user id
//! - `queue:{event_id}:entered` (set) - admitted user ids
//! - `queue:{event_id}:waiting_count` / `queue:{event_id}:entered_count`
//!
//! ## Non-authoritative
//!
//! Postgres rows are the source of truth. The mirror is overwritten
//! wholesale on each shuffle and nudged best-effort afterwards; it
//! may drift, and nothing correctness-critical ever reads it. Write
//! failures here are logged by callers and never roll back the
//! database transition that already committed.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tracing::debug;

/// Cache-related errors.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Could not reach Redis or the command failed
    #[error("Redis command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to open the client
    #[error("Redis connection failed: {0}")]
    Connection(String),
}

/// Redis-backed mirror of queue counters and the waiting set.
#[derive(Clone)]
pub struct QueueCache {
    conn_manager: ConnectionManager,
}

fn waiting_set_key(event_id: i64) -> String {
    format!("queue:{}:waiting", event_id)
}

fn entered_set_key(event_id: i64) -> String {
    format!("queue:{}:entered", event_id)
}

fn waiting_count_key(event_id: i64) -> String {
    format!("queue:{}:waiting_count", event_id)
}

fn entered_count_key(event_id: i64) -> String {
    format!("queue:{}:entered_count", event_id)
}

impl QueueCache {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    /// Overwrite the mirror for an event after a shuffle.
    ///
    /// `user_ids` must be in rank order (index 0 = rank 1). Old keys
    /// are dropped first so a re-seed never mixes generations.
    pub async fn seed_event(&self, event_id: i64, user_ids: &[i64]) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(waiting_set_key(event_id))
            .del(entered_set_key(event_id));

        for (idx, user_id) in user_ids.iter().enumerate() {
            pipe.zadd(waiting_set_key(event_id), *user_id, (idx + 1) as i64)
                .ignore();
        }

        pipe.set(waiting_count_key(event_id), user_ids.len() as i64)
            .set(entered_count_key(event_id), 0i64);

        let _: () = pipe.query_async(&mut conn).await?;

        debug!(
            event_id,
            users = user_ids.len(),
            "Seeded queue mirror after shuffle"
        );

        Ok(())
    }

    /// Move a user from the waiting mirror to the entered mirror.
    pub async fn move_to_entered(&self, event_id: i64, user_id: i64) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = redis::pipe()
            .zrem(waiting_set_key(event_id), user_id)
            .ignore()
            .sadd(entered_set_key(event_id), user_id)
            .ignore()
            .decr(waiting_count_key(event_id), 1i64)
            .ignore()
            .incr(entered_count_key(event_id), 1i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    /// Drop a user from the entered mirror (expired or completed).
    pub async fn remove_from_entered(&self, event_id: i64, user_id: i64) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = redis::pipe()
            .srem(entered_set_key(event_id), user_id)
            .ignore()
            .decr(entered_count_key(event_id), 1i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    /// Advisory membership check for the entered mirror.
    ///
    /// Cheap read for statistics surfaces; admission checks on the
    /// seat path read the database row instead.
    #[allow(dead_code)]
    pub async fn is_in_entered(&self, event_id: i64, user_id: i64) -> Result<bool, CacheError> {
        let mut conn = self.conn_manager.clone();
        let member: bool = conn.sismember(entered_set_key(event_id), user_id).await?;
        Ok(member)
    }

    /// Advisory (waiting, entered) counts. `None` when a key is
    /// missing (mirror not seeded, or evicted).
    pub async fn counts(&self, event_id: i64) -> Result<(Option<i64>, Option<i64>), CacheError> {
        let mut conn = self.conn_manager.clone();

        let waiting: Option<i64> = conn.get(waiting_count_key(event_id)).await?;
        let entered: Option<i64> = conn.get(entered_count_key(event_id)).await?;

        Ok((waiting, entered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(waiting_set_key(7), "queue:7:waiting");
        assert_eq!(entered_set_key(7), "queue:7:entered");
        assert_eq!(waiting_count_key(7), "queue:7:waiting_count");
        assert_eq!(entered_count_key(7), "queue:7:entered_count");
    }

    // Requires a running Redis instance:
    // docker run -d -p 6379:6379 redis:7-alpine
    #[tokio::test]
    #[ignore]
    async fn test_seed_then_move_lifecycle() {
        let cache = QueueCache::connect("redis://127.0.0.1:6379").await.unwrap();
        let event_id = 990_001;

        cache.seed_event(event_id, &[5, 9, 2]).await.unwrap();

        let (waiting, entered) = cache.counts(event_id).await.unwrap();
        assert_eq!(waiting, Some(3));
        assert_eq!(entered, Some(0));

        cache.move_to_entered(event_id, 5).await.unwrap();
        assert!(cache.is_in_entered(event_id, 5).await.unwrap());

        let (waiting, entered) = cache.counts(event_id).await.unwrap();
        assert_eq!(waiting, Some(2));
        assert_eq!(entered, Some(1));

        cache.remove_from_entered(event_id, 5).await.unwrap();
        assert!(!cache.is_in_entered(event_id, 5).await.unwrap());
    }
}
