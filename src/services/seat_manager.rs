//! # Seat Manager Service
//!
//! The single race-free primitive for seat inventory. Every status
//! change goes through one conditional update; whoever's UPDATE
//! matches the expected status wins, everyone else affects zero rows
//! and re-reads to find out why they lost.
//!
//! There is no application-level locking here: the conditional
//! update alone guarantees at most one RESERVED holder per seat.
//!
//! ## Flow Example: Reserve
//!
//! ```text
//! 1. CAS AVAILABLE -> RESERVED
//!            │
//!    ┌───────┴────────┐
//!    ▼ 1 row          ▼ 0 rows
//! reload seat      re-read seat
//! publish event    SOLD     -> AlreadySold
//! return seat      RESERVED -> AlreadyReserved
//!                  missing  -> NotFound
//!                  else     -> ConcurrencyConflict
//! ```

use metrics::counter;
use tracing::{debug, info, warn};

use crate::db::{queries, Database, QueueEntryStatus, SeatRecord, SeatStatus};
use crate::notify::{Notification, Notifier};

/// Errors that can occur in seat operations.
#[derive(Debug, thiserror::Error)]
pub enum SeatError {
    /// Seat does not exist for the event.
    #[error("Seat not found: event={event_id} seat={seat_id}")]
    NotFound { event_id: i64, seat_id: i64 },

    /// Another user currently holds the seat.
    #[error("Seat is already reserved")]
    AlreadyReserved,

    /// The seat has been sold.
    #[error("Seat is already sold")]
    AlreadySold,

    /// The operation required a RESERVED seat but found none.
    #[error("Seat is not reserved")]
    NotReserved,

    /// Lost a compare-and-swap race with no clearer cause.
    #[error("Seat status changed concurrently, try again")]
    ConcurrencyConflict,

    /// Caller has not been admitted to the event's queue.
    #[error("User has not entered the queue for this event")]
    NotInQueue,

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<crate::db::DatabaseError> for SeatError {
    fn from(e: crate::db::DatabaseError) -> Self {
        SeatError::Database(e.to_string())
    }
}

/// Classify a failed AVAILABLE -> RESERVED swap from the re-read
/// seat status.
fn classify_reserve_failure(observed: Option<SeatStatus>) -> SeatError {
    match observed {
        Some(SeatStatus::Sold) => SeatError::AlreadySold,
        Some(SeatStatus::Reserved) => SeatError::AlreadyReserved,
        Some(SeatStatus::Available) => SeatError::ConcurrencyConflict,
        None => SeatError::ConcurrencyConflict,
    }
}

/// Classify a failed RESERVED -> SOLD swap.
fn classify_sold_failure(observed: Option<SeatStatus>) -> SeatError {
    match observed {
        Some(SeatStatus::Sold) => SeatError::AlreadySold,
        // Selling a seat nobody holds is a state-machine violation,
        // never a silent success.
        Some(SeatStatus::Available) => SeatError::NotReserved,
        Some(SeatStatus::Reserved) => SeatError::ConcurrencyConflict,
        None => SeatError::ConcurrencyConflict,
    }
}

fn failure_cause(error: &SeatError) -> &'static str {
    match error {
        SeatError::AlreadySold => "already_sold",
        SeatError::AlreadyReserved => "already_reserved",
        SeatError::NotReserved => "not_reserved",
        SeatError::NotFound { .. } => "not_found",
        _ => "conflict",
    }
}

/// The seat inventory controller.
#[derive(Clone)]
pub struct SeatManager {
    /// Database connection.
    db: Database,

    /// Publisher for seat-status-changed notifications.
    notifier: Notifier,
}

impl SeatManager {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    // ==========================================
    // QUERIES
    // ==========================================

    /// List an event's seats for an admitted user.
    ///
    /// Gated on the caller's queue entry being ENTERED; the check
    /// reads the authoritative row, not the mirror.
    #[allow(dead_code)] // invoked by the upstream API layer
    pub async fn seats_for_event(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> Result<Vec<SeatRecord>, SeatError> {
        let entry = queries::get_queue_entry(self.db.pool(), event_id, user_id).await?;

        let entered = entry
            .map(|e| e.status == QueueEntryStatus::Entered)
            .unwrap_or(false);
        if !entered {
            return Err(SeatError::NotInQueue);
        }

        Ok(queries::find_seats_by_event(self.db.pool(), event_id).await?)
    }

    // ==========================================
    // STATE TRANSITIONS
    // ==========================================

    /// Reserve a seat for a user: AVAILABLE -> RESERVED.
    ///
    /// Exactly one of any number of concurrent callers succeeds; the
    /// losers get a cause-specific error so the client can decide
    /// whether to retry or pick another seat.
    pub async fn reserve(
        &self,
        event_id: i64,
        seat_id: i64,
        user_id: i64,
    ) -> Result<SeatRecord, SeatError> {
        let affected = queries::update_seat_status_if_match(
            self.db.pool(),
            event_id,
            seat_id,
            SeatStatus::Available,
            SeatStatus::Reserved,
        )
        .await?;

        if affected == 0 {
            return Err(self
                .classify_failure(event_id, seat_id, classify_reserve_failure, "reserve")
                .await?);
        }

        let seat = self.reload(event_id, seat_id).await?;

        info!(event_id, seat_id, user_id, code = %seat.seat_code, "Seat reserved");
        self.publish_status(&seat);

        Ok(seat)
    }

    /// Mark a seat sold on payment confirmation: RESERVED -> SOLD.
    pub async fn mark_sold(&self, event_id: i64, seat_id: i64) -> Result<SeatRecord, SeatError> {
        let affected = queries::update_seat_status_if_match(
            self.db.pool(),
            event_id,
            seat_id,
            SeatStatus::Reserved,
            SeatStatus::Sold,
        )
        .await?;

        if affected == 0 {
            return Err(self
                .classify_failure(event_id, seat_id, classify_sold_failure, "mark_sold")
                .await?);
        }

        let seat = self.reload(event_id, seat_id).await?;

        info!(event_id, seat_id, code = %seat.seat_code, "Seat sold");
        self.publish_status(&seat);

        Ok(seat)
    }

    /// Release a seat: RESERVED -> AVAILABLE.
    ///
    /// Idempotent: several independent release paths (deselect,
    /// queue expiration, draft sweep, payment failure) may race to
    /// free the same seat, so finding it already AVAILABLE is
    /// success, not an error.
    pub async fn mark_available(&self, event_id: i64, seat_id: i64) -> Result<(), SeatError> {
        let affected = queries::update_seat_status_if_match(
            self.db.pool(),
            event_id,
            seat_id,
            SeatStatus::Reserved,
            SeatStatus::Available,
        )
        .await?;

        if affected == 0 {
            let seat = queries::get_seat(self.db.pool(), event_id, seat_id).await?;
            return match seat.map(|s| s.status) {
                // Another release path got there first
                Some(SeatStatus::Available) => {
                    debug!(event_id, seat_id, "Seat already released");
                    Ok(())
                }
                Some(SeatStatus::Sold) => Err(SeatError::AlreadySold),
                Some(SeatStatus::Reserved) => Err(SeatError::ConcurrencyConflict),
                None => Err(SeatError::NotFound { event_id, seat_id }),
            };
        }

        let seat = self.reload(event_id, seat_id).await?;

        info!(event_id, seat_id, code = %seat.seat_code, "Seat released");
        self.publish_status(&seat);

        Ok(())
    }

    // ==========================================
    // INTERNALS
    // ==========================================

    /// Re-read a seat after losing a CAS and map the observed status
    /// to a specific failure; records the cause metric.
    async fn classify_failure(
        &self,
        event_id: i64,
        seat_id: i64,
        classify: fn(Option<SeatStatus>) -> SeatError,
        op: &'static str,
    ) -> Result<SeatError, SeatError> {
        let seat = queries::get_seat(self.db.pool(), event_id, seat_id).await?;

        let error = match seat {
            None => SeatError::NotFound { event_id, seat_id },
            Some(s) => classify(Some(s.status)),
        };

        counter!(
            "seat_cas_failure_total",
            "op" => op,
            "cause" => failure_cause(&error)
        )
        .increment(1);

        warn!(event_id, seat_id, op, cause = failure_cause(&error), "Seat CAS lost");

        Ok(error)
    }

    async fn reload(&self, event_id: i64, seat_id: i64) -> Result<SeatRecord, SeatError> {
        queries::get_seat(self.db.pool(), event_id, seat_id)
            .await?
            .ok_or(SeatError::NotFound { event_id, seat_id })
    }

    fn publish_status(&self, seat: &SeatRecord) {
        // After-commit, fire-and-forget
        self.notifier.publish(Notification::SeatStatusChanged {
            event_id: seat.event_id,
            seat_id: seat.id,
            seat_code: seat.seat_code.clone(),
            status: seat.status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_failure_classification() {
        assert!(matches!(
            classify_reserve_failure(Some(SeatStatus::Sold)),
            SeatError::AlreadySold
        ));
        assert!(matches!(
            classify_reserve_failure(Some(SeatStatus::Reserved)),
            SeatError::AlreadyReserved
        ));
        assert!(matches!(
            classify_reserve_failure(Some(SeatStatus::Available)),
            SeatError::ConcurrencyConflict
        ));
        assert!(matches!(
            classify_reserve_failure(None),
            SeatError::ConcurrencyConflict
        ));
    }

    #[test]
    fn test_sold_failure_classification() {
        // Selling an unheld seat must surface as an explicit
        // state-transition error
        assert!(matches!(
            classify_sold_failure(Some(SeatStatus::Available)),
            SeatError::NotReserved
        ));
        assert!(matches!(
            classify_sold_failure(Some(SeatStatus::Sold)),
            SeatError::AlreadySold
        ));
    }

    #[test]
    fn test_failure_cause_labels() {
        assert_eq!(failure_cause(&SeatError::AlreadySold), "already_sold");
        assert_eq!(failure_cause(&SeatError::AlreadyReserved), "already_reserved");
        assert_eq!(failure_cause(&SeatError::ConcurrencyConflict), "conflict");
    }
}
