//! # Expiration Processor Service
//!
//! Demotes ENTERED queue entries whose deadline has elapsed and
//! frees whatever seat they were holding. Also sweeps draft
//! reservations that outlived the entry window (the backstop for
//! release paths that failed best-effort earlier).
//!
//! Every item is processed independently: one bad row never blocks
//! the rest of a run, and the ENTERED -> EXPIRED transition commits
//! even when the downstream seat release fails.

use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use super::admission::QueueError;
use super::reservation_manager::ReservationManager;
use crate::cache::QueueCache;
use crate::db::{queries, Database};
use crate::models::BatchOutcome;
use crate::notify::{Notification, Notifier};

/// Stale drafts handled per sweep run.
const DRAFT_SWEEP_PAGE_SIZE: i64 = 500;
const DRAFT_SWEEP_MAX_PER_RUN: u64 = 2000;

/// The queue expiration processor.
#[derive(Clone)]
pub struct ExpirationProcessor {
    db: Database,
    cache: QueueCache,
    notifier: Notifier,
    reservations: ReservationManager,

    /// Drafts older than this are swept.
    stale_draft_window: Duration,
}

impl ExpirationProcessor {
    pub fn new(
        db: Database,
        cache: QueueCache,
        notifier: Notifier,
        reservations: ReservationManager,
        entry_window_minutes: i64,
    ) -> Self {
        Self {
            db,
            cache,
            notifier,
            reservations,
            stale_draft_window: Duration::minutes(entry_window_minutes),
        }
    }

    /// Expire a single entry, idempotently.
    ///
    /// Returns `true` when this call performed the demotion. An
    /// entry that is already EXPIRED, or that raced to COMPLETED
    /// under a concurrent payment, is left untouched.
    pub async fn expire_entry(&self, event_id: i64, user_id: i64) -> Result<bool, QueueError> {
        let affected = queries::mark_entry_expired(self.db.pool(), event_id, user_id).await?;

        if affected == 0 {
            let entry = queries::get_queue_entry(self.db.pool(), event_id, user_id)
                .await?
                .ok_or(QueueError::EntryNotFound { event_id, user_id })?;

            debug!(
                event_id,
                user_id,
                status = entry.status.as_str(),
                "Entry not ENTERED, expiration is a no-op"
            );
            return Ok(false);
        }

        // Everything past this point is secondary to the committed
        // transition: release the held seat, trim the mirror, notify.
        self.reservations.release_draft(event_id, user_id).await;

        if let Err(e) = self.cache.remove_from_entered(event_id, user_id).await {
            warn!(event_id, user_id, error = %e, "Queue mirror update failed");
        }

        self.notifier
            .publish(Notification::QueueExpired { event_id, user_id });

        debug!(event_id, user_id, "Queue entry expired");

        Ok(true)
    }

    /// One expiration tick: demote every ENTERED entry strictly past
    /// its deadline.
    pub async fn expire_overdue(&self) -> Result<BatchOutcome, QueueError> {
        let now = Utc::now();
        let overdue = queries::find_overdue_entries(self.db.pool(), now).await?;

        if overdue.is_empty() {
            return Ok(BatchOutcome::default());
        }

        info!(candidates = overdue.len(), "SCHED_BATCH_FOUND job=QueueExpire");

        let mut outcome = BatchOutcome::default();

        for entry in overdue {
            match self.expire_entry(entry.event_id, entry.user_id).await {
                Ok(true) => outcome.processed += 1,
                Ok(false) => {}
                Err(e) => {
                    outcome.failed += 1;
                    error!(
                        event_id = entry.event_id,
                        user_id = entry.user_id,
                        error = %e,
                        "Entry expiration failed"
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Sweep DRAFT reservations older than the entry window.
    ///
    /// Paginated with a per-run cap so the job lock is never held
    /// for long on a large backlog.
    pub async fn expire_stale_drafts(&self) -> Result<BatchOutcome, QueueError> {
        let cutoff = Utc::now() - self.stale_draft_window;
        let mut outcome = BatchOutcome::default();

        while outcome.processed + outcome.failed < DRAFT_SWEEP_MAX_PER_RUN {
            let drafts =
                queries::find_stale_drafts(self.db.pool(), cutoff, DRAFT_SWEEP_PAGE_SIZE).await?;

            if drafts.is_empty() {
                break;
            }

            let page_len = drafts.len();

            for draft in drafts {
                match self.reservations.expire_draft(&draft).await {
                    Ok(()) => outcome.processed += 1,
                    Err(e) => {
                        outcome.failed += 1;
                        error!(
                            reservation_id = %draft.id,
                            error = %e,
                            "Draft expiry failed"
                        );
                    }
                }
            }

            // A short page means the backlog is drained
            if (page_len as i64) < DRAFT_SWEEP_PAGE_SIZE {
                break;
            }
        }

        if outcome.processed + outcome.failed >= DRAFT_SWEEP_MAX_PER_RUN {
            warn!(
                limit = DRAFT_SWEEP_MAX_PER_RUN,
                "SCHED_LIMIT_REACHED job=DraftExpiration"
            );
        }

        Ok(outcome)
    }
}
