//! # Distributed Lock Module
//!
//! Cluster-wide mutual exclusion over Redis. Every instance of the
//! backend runs the same periodic jobs and the same per-event
//! timers; this lock is what keeps a named unit of work from
//! executing on more than one instance at a time.
//!
//! ## Hold bounds
//!
//! Each acquisition carries two durations:
//! - **at most**: the key's TTL. A holder that crashes mid-task can
//!   block the job for at most this long; afterwards the lock
//!   self-expires and another instance makes progress.
//! - **at least**: on release before this bound the key is kept
//!   alive for the remainder instead of being deleted, so a fast
//!   task does not let a clock-skewed peer re-run the same unit
//!   immediately.
//!
//! Release and TTL-shrink are token-checked Lua scripts: an instance
//! whose lock already expired can never delete a lock now held by
//! someone else.

use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::Client;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default "hold at most" bound for periodic jobs.
pub const DEFAULT_LOCK_AT_MOST: Duration = Duration::from_secs(120);

/// Default "hold at least" bound for periodic jobs.
pub const DEFAULT_LOCK_AT_LEAST: Duration = Duration::from_secs(10);

/// Lock-related errors.
#[derive(Error, Debug)]
pub enum LockError {
    /// Could not reach Redis or the command failed
    #[error("Lock command failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// Failed to open the client
    #[error("Lock store connection failed: {0}")]
    Connection(String),
}

/// Outcome of a lock-guarded execution.
///
/// `Skipped` means the lock was held elsewhere: the unit of work was
/// (or is being) executed by another instance, and this caller must
/// treat it as handled.
#[derive(Debug)]
pub enum LockOutcome<T> {
    Executed(T),
    Skipped,
}

/// Redis-backed cluster-wide lock manager.
#[derive(Clone)]
pub struct LockManager {
    conn_manager: ConnectionManager,
}

fn lock_key(name: &str) -> String {
    format!("lock:{}", name)
}

impl LockManager {
    /// Connect to the Redis instance backing the locks.
    pub async fn connect(redis_url: &str) -> Result<Self, LockError> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Connection(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LockError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn_manager })
    }

    /// Run `task` under the named cluster-wide lock.
    ///
    /// Returns `Skipped` without running the task when the lock is
    /// already held. The task itself is infallible from the lock's
    /// point of view; callers put a `Result` in `T` when they need
    /// one.
    pub async fn execute_with_lock<T, F, Fut>(
        &self,
        lock_name: &str,
        at_most: Duration,
        at_least: Duration,
        task: F,
    ) -> Result<LockOutcome<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let key = lock_key(lock_name);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn_manager.clone();

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(at_most.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        if acquired.is_none() {
            debug!(lock = lock_name, "Lock held elsewhere, skipping");
            return Ok(LockOutcome::Skipped);
        }

        let started = Instant::now();
        let result = task().await;

        if let Err(e) = self.release(&key, &token, started.elapsed(), at_least).await {
            // The key still self-expires via its TTL
            warn!(lock = lock_name, error = %e, "Failed to release lock");
        }

        Ok(LockOutcome::Executed(result))
    }

    /// Run `task` under the named lock with the default periodic-job
    /// bounds (at most 2 minutes, at least 10 seconds).
    pub async fn execute_with_default_lock<T, F, Fut>(
        &self,
        lock_name: &str,
        task: F,
    ) -> Result<LockOutcome<T>, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        self.execute_with_lock(lock_name, DEFAULT_LOCK_AT_MOST, DEFAULT_LOCK_AT_LEAST, task)
            .await
    }

    /// Release the lock, honoring the "hold at least" bound.
    ///
    /// Before the bound: shrink the TTL to the remainder rather than
    /// deleting. After it: delete. Both paths verify the token so a
    /// stale holder cannot touch a lock that expired and was
    /// re-acquired elsewhere.
    async fn release(
        &self,
        key: &str,
        token: &str,
        held_for: Duration,
        at_least: Duration,
    ) -> Result<(), LockError> {
        let mut conn = self.conn_manager.clone();

        if held_for >= at_least {
            let script = redis::Script::new(
                r#"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('DEL', KEYS[1])
                end
                return 0
                "#,
            );
            let _: i64 = script.key(key).arg(token).invoke_async(&mut conn).await?;
        } else {
            let remainder = at_least - held_for;
            let script = redis::Script::new(
                r#"
                if redis.call('GET', KEYS[1]) == ARGV[1] then
                    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
                end
                return 0
                "#,
            );
            let _: i64 = script
                .key(key)
                .arg(token)
                .arg(remainder.as_millis() as u64)
                .invoke_async(&mut conn)
                .await?;
        }

        Ok(())
    }
}

/// Lock name for a per-event shuffle execution.
pub fn shuffle_lock_name(event_id: i64) -> String {
    format!("QueueShuffle-{}", event_id)
}

/// Lock name for a per-event lifecycle transition.
pub fn transition_lock_name(event_id: i64, target_status: &str) -> String {
    format!("EventTransition-{}-{}", event_id, target_status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_lock_name_formats() {
        assert_eq!(lock_key("QueueEntry"), "lock:QueueEntry");
        assert_eq!(shuffle_lock_name(42), "QueueShuffle-42");
        assert_eq!(transition_lock_name(42, "OPEN"), "EventTransition-42-OPEN");
    }

    // Requires a running Redis instance:
    // docker run -d -p 6379:6379 redis:7-alpine
    #[tokio::test]
    #[ignore]
    async fn test_concurrent_holders_execute_once() {
        let manager = LockManager::connect("redis://127.0.0.1:6379").await.unwrap();
        let executions = Arc::new(AtomicUsize::new(0));

        let name = format!("test-lock-{}", Uuid::new_v4());
        let at_most = Duration::from_secs(5);
        let at_least = Duration::from_millis(500);

        let m1 = manager.clone();
        let m2 = manager.clone();
        let e1 = executions.clone();
        let e2 = executions.clone();
        let n1 = name.clone();
        let n2 = name.clone();

        let (r1, r2) = tokio::join!(
            m1.execute_with_lock(&n1, at_most, at_least, || async move {
                e1.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }),
            m2.execute_with_lock(&n2, at_most, at_least, || async move {
                e2.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }),
        );

        let executed =
            matches!(r1.unwrap(), LockOutcome::Executed(_)) as usize
                + matches!(r2.unwrap(), LockOutcome::Executed(_)) as usize;

        assert_eq!(executed, 1, "exactly one instance should run the task");
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    // Requires a running Redis instance.
    #[tokio::test]
    #[ignore]
    async fn test_hold_at_least_blocks_immediate_reacquire() {
        let manager = LockManager::connect("redis://127.0.0.1:6379").await.unwrap();
        let name = format!("test-lock-{}", Uuid::new_v4());
        let at_most = Duration::from_secs(5);
        let at_least = Duration::from_millis(800);

        let first = manager
            .execute_with_lock(&name, at_most, at_least, || async {})
            .await
            .unwrap();
        assert!(matches!(first, LockOutcome::Executed(())));

        // Inside the at-least window the lock is still alive
        let second = manager
            .execute_with_lock(&name, at_most, at_least, || async {})
            .await
            .unwrap();
        assert!(matches!(second, LockOutcome::Skipped));

        tokio::time::sleep(Duration::from_millis(900)).await;

        let third = manager
            .execute_with_lock(&name, at_most, at_least, || async {})
            .await
            .unwrap();
        assert!(matches!(third, LockOutcome::Executed(())));
    }
}
