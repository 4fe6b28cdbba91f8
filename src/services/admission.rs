//! # Admission Processor Service
//!
//! Promotes WAITING queue entries to ENTERED in bounded batches,
//! stamping each with its entry-window deadline. Runs for every
//! event currently OPEN on each processing tick.
//!
//! Rank decides the iteration order of a batch, nothing more: when
//! several batch runs race across instances there is no strict FIFO
//! guarantee, only that each entry is promoted at most once.

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::cache::QueueCache;
use crate::db::{queries, Database, EventStatus, QueueEntryStatus};
use crate::models::BatchOutcome;
use crate::notify::{Notification, Notifier};

/// Errors that can occur while processing queue entries.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No entry exists for the (event, user) pair.
    #[error("Queue entry not found: event={event_id} user={user_id}")]
    EntryNotFound { event_id: i64, user_id: i64 },

    /// The entry was already promoted.
    #[error("Queue entry already entered")]
    AlreadyEntered,

    /// The entry's window already lapsed.
    #[error("Queue entry already expired")]
    AlreadyExpired,

    /// The entry is in some other non-WAITING state.
    #[error("Queue entry is not waiting")]
    NotWaiting,

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<crate::db::DatabaseError> for QueueError {
    fn from(e: crate::db::DatabaseError) -> Self {
        QueueError::Database(e.to_string())
    }
}

/// Map the re-read status of an entry that refused promotion to the
/// specific cause the caller reports.
fn classify_enter_failure(observed: QueueEntryStatus) -> QueueError {
    match observed {
        QueueEntryStatus::Entered => QueueError::AlreadyEntered,
        QueueEntryStatus::Expired => QueueError::AlreadyExpired,
        _ => QueueError::NotWaiting,
    }
}

/// The queue admission processor.
#[derive(Clone)]
pub struct AdmissionProcessor {
    db: Database,
    cache: QueueCache,
    notifier: Notifier,

    /// How long an admitted user keeps their slot.
    entry_window: Duration,

    /// WAITING entries promoted per event per tick.
    batch_size: i64,
}

impl AdmissionProcessor {
    pub fn new(
        db: Database,
        cache: QueueCache,
        notifier: Notifier,
        entry_window_minutes: i64,
        batch_size: i64,
    ) -> Self {
        Self {
            db,
            cache,
            notifier,
            entry_window: Duration::minutes(entry_window_minutes),
            batch_size,
        }
    }

    /// Promote a single entry WAITING -> ENTERED.
    ///
    /// A non-WAITING entry fails with its specific cause; it is
    /// never silently skipped. On success the committed transition
    /// stands regardless of what the mirror or notifier do.
    pub async fn process_entry(&self, event_id: i64, user_id: i64) -> Result<(), QueueError> {
        let entered_at = Utc::now();
        let expires_at = entered_at + self.entry_window;

        let affected = queries::mark_entry_entered(
            self.db.pool(),
            event_id,
            user_id,
            entered_at,
            expires_at,
        )
        .await?;

        if affected == 0 {
            let entry = queries::get_queue_entry(self.db.pool(), event_id, user_id).await?;
            return Err(match entry {
                None => QueueError::EntryNotFound { event_id, user_id },
                Some(e) => classify_enter_failure(e.status),
            });
        }

        debug!(event_id, user_id, %expires_at, "Queue entry entered");

        // Mirror update is best-effort; the committed transition is
        // never rolled back for it
        if let Err(e) = self.cache.move_to_entered(event_id, user_id).await {
            warn!(event_id, user_id, error = %e, "Queue mirror update failed");
        }

        self.notifier.publish(Notification::QueueEntered {
            event_id,
            user_id,
            expires_at,
        });

        Ok(())
    }

    /// Promote a batch of entries, continuing past individual
    /// failures.
    pub async fn process_batch(&self, event_id: i64, user_ids: &[i64]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for &user_id in user_ids {
            match self.process_entry(event_id, user_id).await {
                Ok(()) => outcome.processed += 1,
                Err(e) => {
                    outcome.failed += 1;
                    error!(event_id, user_id, error = %e, "Entry promotion failed");
                }
            }
        }

        outcome
    }

    /// One admission tick: for every OPEN event, promote the top
    /// batch of WAITING entries by rank.
    pub async fn process_open_events(&self) -> Result<BatchOutcome, QueueError> {
        let open_events =
            queries::find_events_by_status(self.db.pool(), EventStatus::Open).await?;

        if open_events.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut total = BatchOutcome::default();

        for event in open_events {
            let waiting =
                match queries::find_top_waiting(self.db.pool(), event.id, self.batch_size).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        error!(event_id = event.id, error = %e, "Failed to load waiting batch");
                        continue;
                    }
                };

            if waiting.is_empty() {
                continue;
            }

            let user_ids: Vec<i64> = waiting.iter().map(|e| e.user_id).collect();
            let outcome = self.process_batch(event.id, &user_ids).await;

            info!(
                event_id = event.id,
                processed = outcome.processed,
                failed = outcome.failed,
                "Admission batch complete"
            );

            total.processed += outcome.processed;
            total.failed += outcome.failed;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_failure_causes_are_specific() {
        assert!(matches!(
            classify_enter_failure(QueueEntryStatus::Entered),
            QueueError::AlreadyEntered
        ));
        assert!(matches!(
            classify_enter_failure(QueueEntryStatus::Expired),
            QueueError::AlreadyExpired
        ));
        assert!(matches!(
            classify_enter_failure(QueueEntryStatus::Completed),
            QueueError::NotWaiting
        ));
    }
}
