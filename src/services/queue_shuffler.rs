//! # Queue Shuffler Service
//!
//! Produces the single randomized admission order for an event:
//! uniformly permutes the pre-registered roster, assigns ranks 1..N,
//! and bulk-creates the WAITING entries.
//!
//! The shuffle runs exactly once per event. Two mechanisms enforce
//! that under simultaneous triggers (scheduled timer racing a manual
//! admin trigger, or several instances firing the same timer):
//! the per-event cluster lock, and the existing-entries check inside
//! it. Persisted entries are the only source of truth; the Redis
//! mirror is reseeded best-effort afterwards.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use crate::cache::QueueCache;
use crate::db::{queries, Database, EventStatus};
use crate::lock::{shuffle_lock_name, LockManager, LockOutcome};

/// Errors that can occur while shuffling a queue.
#[derive(Debug, thiserror::Error)]
pub enum ShuffleError {
    /// Event does not exist.
    #[error("Event not found: {0}")]
    EventNotFound(i64),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// The lock provider failed (not "lock held" - that is a skip).
    #[error("Lock provider error: {0}")]
    Lock(String),
}

impl From<crate::db::DatabaseError> for ShuffleError {
    fn from(e: crate::db::DatabaseError) -> Self {
        ShuffleError::Database(e.to_string())
    }
}

/// What a shuffle invocation did.
#[derive(Debug, PartialEq, Eq)]
pub enum ShuffleOutcome {
    /// Entries were created for this many users.
    Shuffled { users: usize },

    /// Entries already existed; nothing to do.
    AlreadyShuffled,

    /// The roster was empty; nothing to do.
    NoUsers,

    /// Another instance holds the shuffle lock.
    Skipped,
}

/// Uniformly permute the roster and assign ascending ranks 1..N.
///
/// Returned pairs are `(user_id, rank)` in rank order.
fn assign_ranks<R: Rng>(mut user_ids: Vec<i64>, rng: &mut R) -> Vec<(i64, i32)> {
    user_ids.shuffle(rng);
    user_ids
        .into_iter()
        .enumerate()
        .map(|(idx, user_id)| (user_id, (idx + 1) as i32))
        .collect()
}

/// The queue shuffle engine.
#[derive(Clone)]
pub struct QueueShuffler {
    db: Database,
    cache: QueueCache,
    lock: LockManager,
}

impl QueueShuffler {
    pub fn new(db: Database, cache: QueueCache, lock: LockManager) -> Self {
        Self { db, cache, lock }
    }

    /// Shuffle an event's pre-registered roster into a queue.
    ///
    /// Safe to call repeatedly and from several instances at once:
    /// the per-event lock admits one runner, and existing entries
    /// turn the run into a no-op.
    pub async fn shuffle(&self, event_id: i64) -> Result<ShuffleOutcome, ShuffleError> {
        let lock_name = shuffle_lock_name(event_id);

        let outcome = self
            .lock
            .execute_with_default_lock(&lock_name, || self.shuffle_locked(event_id))
            .await
            .map_err(|e| ShuffleError::Lock(e.to_string()))?;

        match outcome {
            LockOutcome::Executed(result) => result,
            LockOutcome::Skipped => {
                warn!(event_id, "SHUFFLE_LOCKED another instance is shuffling");
                Ok(ShuffleOutcome::Skipped)
            }
        }
    }

    async fn shuffle_locked(&self, event_id: i64) -> Result<ShuffleOutcome, ShuffleError> {
        let event = queries::get_event(self.db.pool(), event_id)
            .await?
            .ok_or(ShuffleError::EventNotFound(event_id))?;

        // Idempotence: entries are created once per event, ever
        let existing = queries::count_queue_entries(self.db.pool(), event_id).await?;
        if existing > 0 {
            info!(event_id, existing, "SHUFFLE_SKIP_ALREADY_DONE");
            return Ok(ShuffleOutcome::AlreadyShuffled);
        }

        let roster = queries::find_pre_registered_user_ids(self.db.pool(), event_id).await?;
        if roster.is_empty() {
            warn!(event_id, "SHUFFLE_NO_USERS");
            return Ok(ShuffleOutcome::NoUsers);
        }

        let ranked = assign_ranks(roster, &mut rand::thread_rng());
        let user_ids: Vec<i64> = ranked.iter().map(|(u, _)| *u).collect();
        let ranks: Vec<i32> = ranked.iter().map(|(_, r)| *r).collect();

        let created =
            queries::insert_queue_entries(self.db.pool(), event_id, &user_ids, &ranks).await?;

        // The shuffle readies the event for ticket open; if the
        // status already moved past PRE_CLOSED this is a no-op.
        let advanced = queries::advance_event_status(
            self.db.pool(),
            event_id,
            EventStatus::PreClosed,
            EventStatus::QueueReady,
        )
        .await?;
        if advanced == 0 && event.status != EventStatus::QueueReady {
            info!(
                event_id,
                status = event.status.as_str(),
                "Event not in PRE_CLOSED at shuffle time, status left alone"
            );
        }

        // Mirror seeding is best-effort; the entries above are the
        // source of truth
        if let Err(e) = self.cache.seed_event(event_id, &user_ids).await {
            warn!(event_id, error = %e, "Queue mirror seeding failed, continuing");
        }

        info!(event_id, users = created, "SHUFFLE_SUCCESS");

        Ok(ShuffleOutcome::Shuffled {
            users: created as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_assign_ranks_is_a_permutation() {
        let users = vec![5, 9, 2, 17, 42];
        let mut rng = StdRng::seed_from_u64(7);

        let ranked = assign_ranks(users.clone(), &mut rng);

        assert_eq!(ranked.len(), users.len());

        let ranks: HashSet<i32> = ranked.iter().map(|(_, r)| *r).collect();
        assert_eq!(ranks, (1..=5).collect::<HashSet<i32>>());

        let ranked_users: HashSet<i64> = ranked.iter().map(|(u, _)| *u).collect();
        assert_eq!(ranked_users, users.into_iter().collect::<HashSet<i64>>());
    }

    #[test]
    fn test_assign_ranks_actually_shuffles() {
        // With 50 users at least one seed must produce a non-identity
        // permutation; a fixed seed keeps this deterministic.
        let users: Vec<i64> = (1..=50).collect();
        let mut rng = StdRng::seed_from_u64(1);

        let ranked = assign_ranks(users.clone(), &mut rng);
        let identity = ranked
            .iter()
            .all(|(user_id, rank)| *user_id == *rank as i64);

        assert!(!identity, "shuffle produced the identity permutation");
    }

    #[test]
    fn test_assign_ranks_empty_roster() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(assign_ranks(Vec::new(), &mut rng).is_empty());
    }

    #[test]
    fn test_assign_ranks_single_user() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(assign_ranks(vec![99], &mut rng), vec![(99, 1)]);
    }
}
