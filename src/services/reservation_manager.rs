//! # Reservation Manager Service
//!
//! Orchestrates the checkout flow for admitted users: one draft
//! reservation per (event, user), seat selection against the seat
//! manager's CAS primitive, and payment confirmation.
//!
//! The hot-path rule here is reserve-before-release: when a user
//! switches seats, the new seat is taken first and only then is the
//! old one freed, so a failed reservation never leaves the user
//! seatless. Operations stay short; this path carries the bulk of
//! the load while a sale is open.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::queue_reader::QueueReader;
use super::seat_manager::{SeatError, SeatManager};
use crate::cache::QueueCache;
use crate::db::{queries, Database, ReservationRecord, ReservationStatus};
use crate::models::{PaymentResponse, ReservationResponse, SeatResponse};
use crate::notify::{Notification, Notifier};
use crate::payment::{PaymentError, PaymentGateway};

/// Errors that can occur in the reservation flow.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// Caller has not been admitted to the event's queue.
    #[error("User has not entered the queue for this event")]
    NotInQueue,

    /// No draft reservation exists for the caller.
    #[error("No draft reservation for this event")]
    NoDraft,

    /// The draft does not hold the seat the operation names.
    #[error("Seat is not selected on this reservation")]
    SeatNotSelected,

    /// Seat operation failed with a specific cause.
    #[error(transparent)]
    Seat(#[from] SeatError),

    /// Payment gateway reported a failure.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Queue entry lookup failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<crate::db::DatabaseError> for ReservationError {
    fn from(e: crate::db::DatabaseError) -> Self {
        ReservationError::Database(e.to_string())
    }
}

/// The draft reservation orchestrator.
#[derive(Clone)]
pub struct ReservationManager {
    db: Database,
    seats: SeatManager,
    queue: QueueReader,
    cache: QueueCache,
    notifier: Notifier,
    gateway: Arc<dyn PaymentGateway>,
}

impl ReservationManager {
    pub fn new(
        db: Database,
        seats: SeatManager,
        queue: QueueReader,
        cache: QueueCache,
        notifier: Notifier,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            seats,
            queue,
            cache,
            notifier,
            gateway,
        }
    }

    /// Fetch the caller's draft, creating an empty one if none
    /// exists. The partial unique index collapses concurrent
    /// creators onto a single row.
    async fn get_or_create_draft(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> Result<ReservationRecord, ReservationError> {
        if let Some(draft) =
            queries::get_draft_reservation(self.db.pool(), event_id, user_id).await?
        {
            return Ok(draft);
        }

        queries::insert_draft_reservation(self.db.pool(), Uuid::new_v4(), event_id, user_id)
            .await?;

        // Re-read covers both our insert and a concurrent winner's
        queries::get_draft_reservation(self.db.pool(), event_id, user_id)
            .await?
            .ok_or_else(|| {
                ReservationError::Database("draft reservation vanished after insert".into())
            })
    }

    // ==========================================
    // SEAT SELECTION
    // ==========================================

    /// Select (or switch to) a seat.
    ///
    /// Requires an ENTERED queue entry. Reserves the new seat before
    /// releasing any previously held one; the release of the old
    /// seat is best-effort, with the draft sweep as backstop.
    #[allow(dead_code)] // invoked by the upstream API layer
    pub async fn select_seat(
        &self,
        event_id: i64,
        seat_id: i64,
        user_id: i64,
    ) -> Result<ReservationResponse, ReservationError> {
        // Fast fail before touching inventory
        let entered = self
            .queue
            .is_entered(event_id, user_id)
            .await
            .map_err(|e| ReservationError::Queue(e.to_string()))?;
        if !entered {
            return Err(ReservationError::NotInQueue);
        }

        let draft = self.get_or_create_draft(event_id, user_id).await?;
        let old_seat = draft.seat_id;

        // New seat first; on failure the old seat stays held
        let new_seat = self.seats.reserve(event_id, seat_id, user_id).await?;

        queries::assign_reservation_seat(self.db.pool(), draft.id, seat_id).await?;

        if let Some(old_seat_id) = old_seat {
            if let Err(e) = self.seats.mark_available(event_id, old_seat_id).await {
                warn!(
                    event_id,
                    seat_id = old_seat_id,
                    error = %e,
                    "Failed to release previous seat (sweep will handle)"
                );
            }
        }

        info!(event_id, user_id, seat_id, "Seat selected");

        Ok(ReservationResponse {
            reservation_id: draft.id,
            event_id,
            user_id,
            seat: Some(SeatResponse::from_record(&new_seat)),
        })
    }

    /// Release the held seat, keeping the draft for reuse.
    #[allow(dead_code)] // invoked by the upstream API layer
    pub async fn deselect_seat(
        &self,
        event_id: i64,
        seat_id: i64,
        user_id: i64,
    ) -> Result<(), ReservationError> {
        let draft = queries::get_draft_reservation(self.db.pool(), event_id, user_id)
            .await?
            .ok_or(ReservationError::NoDraft)?;

        if draft.seat_id != Some(seat_id) {
            return Err(ReservationError::SeatNotSelected);
        }

        self.seats.mark_available(event_id, seat_id).await?;
        queries::clear_reservation_seat(self.db.pool(), draft.id).await?;

        info!(event_id, user_id, seat_id, "Seat deselected");

        Ok(())
    }

    // ==========================================
    // PAYMENT
    // ==========================================

    /// Confirm payment for the caller's draft.
    ///
    /// Charges through the gateway, then: seat SOLD, draft
    /// COMPLETED, queue entry COMPLETED. A gateway decline leaves
    /// everything as it was.
    #[allow(dead_code)] // invoked by the upstream API layer
    pub async fn confirm_payment(
        &self,
        event_id: i64,
        user_id: i64,
    ) -> Result<PaymentResponse, ReservationError> {
        let draft = queries::get_draft_reservation(self.db.pool(), event_id, user_id)
            .await?
            .ok_or(ReservationError::NoDraft)?;

        let seat_id = draft.seat_id.ok_or(ReservationError::SeatNotSelected)?;

        let seat = queries::get_seat(self.db.pool(), event_id, seat_id)
            .await?
            .ok_or(SeatError::NotFound { event_id, seat_id })?;

        let confirmation = self
            .gateway
            .confirm(draft.id, i64::from(seat.price))
            .await?;

        self.seats.mark_sold(event_id, seat_id).await?;

        queries::finish_draft_reservation(self.db.pool(), draft.id, ReservationStatus::Completed)
            .await?;

        // The entry may have raced to EXPIRED; the purchase still
        // stands, so log and continue
        let completed = queries::mark_entry_completed(self.db.pool(), event_id, user_id).await?;
        if completed == 0 {
            warn!(event_id, user_id, "Queue entry was not ENTERED at payment time");
        }

        if let Err(e) = self.cache.remove_from_entered(event_id, user_id).await {
            warn!(event_id, user_id, error = %e, "Queue mirror update failed");
        }

        self.notifier.publish(Notification::PaymentCompleted {
            event_id,
            user_id,
            seat_id,
        });

        info!(
            event_id,
            user_id,
            seat_id,
            order_id = %confirmation.order_id,
            reference = %confirmation.provider_reference,
            "Payment confirmed"
        );

        Ok(PaymentResponse {
            reservation_id: draft.id,
            seat_id,
            amount: confirmation.amount,
            provider_reference: confirmation.provider_reference,
        })
    }

    // ==========================================
    // RELEASE PATHS
    // ==========================================

    /// Cancel the user's draft and free its seat.
    ///
    /// Called when a queue entry is demoted. Failures are logged and
    /// left for the draft sweep to pick up.
    pub async fn release_draft(&self, event_id: i64, user_id: i64) {
        let draft = match queries::get_draft_reservation(self.db.pool(), event_id, user_id).await {
            Ok(Some(draft)) => draft,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    event_id,
                    user_id,
                    error = %e,
                    "Draft lookup failed on release (sweep will handle)"
                );
                return;
            }
        };

        if let Err(e) =
            queries::finish_draft_reservation(self.db.pool(), draft.id, ReservationStatus::Cancelled)
                .await
        {
            warn!(event_id, user_id, error = %e, "Draft cancel failed (sweep will handle)");
            return;
        }

        if let Some(seat_id) = draft.seat_id {
            if let Err(e) = self.seats.mark_available(event_id, seat_id).await {
                warn!(
                    event_id,
                    seat_id,
                    error = %e,
                    "Seat release failed on draft cancel (sweep will handle)"
                );
            }
        }
    }

    /// Expire a stale draft found by the sweep.
    ///
    /// The status change is the primary responsibility and always
    /// applies (conditionally on the row still being DRAFT); the
    /// seat release is secondary and tolerates the seat being
    /// already free.
    pub async fn expire_draft(
        &self,
        reservation: &ReservationRecord,
    ) -> Result<(), ReservationError> {
        let finished = queries::finish_draft_reservation(
            self.db.pool(),
            reservation.id,
            ReservationStatus::Expired,
        )
        .await?;

        if finished == 0 {
            // Completed or cancelled in the meantime
            return Ok(());
        }

        if let Some(seat_id) = reservation.seat_id {
            if let Err(e) = self
                .seats
                .mark_available(reservation.event_id, seat_id)
                .await
            {
                warn!(
                    event_id = reservation.event_id,
                    seat_id,
                    error = %e,
                    "Seat release failed on draft expiry"
                );
            }
        }

        info!(
            event_id = reservation.event_id,
            user_id = reservation.user_id,
            reservation_id = %reservation.id,
            "Draft reservation expired"
        );

        Ok(())
    }
}
