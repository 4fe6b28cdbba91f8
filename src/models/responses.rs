//! # Operation Response Models
//!
//! Results handed back to upstream callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{QueueEntryStatus, SeatStatus};

/// A user's view of their own queue position.
///
/// `queue_rank`, `status`, and `waiting_ahead` come from the
/// database and are authoritative. The two totals come from the
/// Redis mirror: they are advisory, may drift, and are `None` when
/// the mirror is unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatusResponse {
    pub event_id: i64,
    pub user_id: i64,

    /// Position assigned by the shuffle.
    pub queue_rank: i32,

    pub status: QueueEntryStatus,

    /// WAITING entries ranked ahead of this one.
    pub waiting_ahead: i64,

    /// Entry-window deadline, once admitted.
    pub expires_at: Option<DateTime<Utc>>,

    /// Advisory total of waiting users (mirror).
    pub waiting_total: Option<i64>,

    /// Advisory total of admitted users (mirror).
    pub entered_total: Option<i64>,
}

/// A seat as shown to an admitted user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatResponse {
    pub seat_id: i64,
    pub seat_code: String,
    pub grade: String,
    pub price: i32,
    pub status: SeatStatus,
}

impl SeatResponse {
    pub fn from_record(seat: &crate::db::SeatRecord) -> Self {
        Self {
            seat_id: seat.id,
            seat_code: seat.seat_code.clone(),
            grade: seat.grade.clone(),
            price: seat.price,
            status: seat.status,
        }
    }
}

/// Result of a seat selection: the draft and its held seat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
    pub event_id: i64,
    pub user_id: i64,
    pub seat: Option<SeatResponse>,
}

/// Result of a confirmed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub reservation_id: Uuid,
    pub seat_id: i64,
    pub amount: i64,

    /// Provider-side reference for reconciliation.
    pub provider_reference: String,
}

/// Outcome of one batch job run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub processed: u64,
    pub failed: u64,
}
