//! # Queue Reader Service
//!
//! Read-side queries over queue entries: the admission check the
//! seat path fails fast on, and the "where am I" status a waiting
//! user polls.

use tracing::debug;

use super::admission::QueueError;
use crate::cache::QueueCache;
use crate::db::{queries, Database, QueueEntryStatus};
use crate::models::QueueStatusResponse;

/// Read-only view over queue entries.
#[derive(Clone)]
pub struct QueueReader {
    db: Database,
    cache: QueueCache,
}

impl QueueReader {
    pub fn new(db: Database, cache: QueueCache) -> Self {
        Self { db, cache }
    }

    /// Whether the user is currently admitted (ENTERED).
    ///
    /// Reads the authoritative row; the mirror is never trusted for
    /// this decision.
    pub async fn is_entered(&self, event_id: i64, user_id: i64) -> Result<bool, QueueError> {
        let entry = queries::get_queue_entry(self.db.pool(), event_id, user_id).await?;
        Ok(entry
            .map(|e| e.status == QueueEntryStatus::Entered)
            .unwrap_or(false))
    }

    /// The caller's own queue position.
    ///
    /// Rank, status, and the ahead-count are authoritative; the two
    /// totals come from the mirror and are advisory (absent when the
    /// mirror is down or unseeded).
    #[allow(dead_code)] // invoked by the upstream API layer
    pub async fn queue_status(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> Result<QueueStatusResponse, QueueError> {
        let entry = queries::get_queue_entry(self.db.pool(), event_id, user_id)
            .await?
            .ok_or(QueueError::EntryNotFound { event_id, user_id })?;

        let waiting_ahead =
            queries::count_waiting_ahead(self.db.pool(), event_id, entry.queue_rank).await?;

        let (waiting_total, entered_total) = match self.cache.counts(event_id).await {
            Ok(counts) => counts,
            Err(e) => {
                debug!(event_id, error = %e, "Queue mirror unavailable for status read");
                (None, None)
            }
        };

        Ok(QueueStatusResponse {
            event_id,
            user_id,
            queue_rank: entry.queue_rank,
            status: entry.status,
            waiting_ahead,
            expires_at: entry.expires_at,
            waiting_total,
            entered_total,
        })
    }
}
