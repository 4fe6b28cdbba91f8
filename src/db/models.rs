//! # Database Models
//!
//! Data structures that map to database tables. Each struct
//! represents a row; statuses are stored as text and surfaced
//! as Rust enums.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `events` | Sale events with their lifecycle timestamps |
//! | `pre_registrations` | Roster the queue shuffle consumes |
//! | `queue_entries` | Per-user admission state (rank + status) |
//! | `seats` | Seat inventory with CAS-guarded status |
//! | `reservations` | Draft reservations preceding payment |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a sale event.
///
/// The lifecycle scheduler only ever advances this; it never
/// regresses automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventStatus {
    /// Created, nothing open yet.
    Ready,
    /// Pre-registration window is open.
    PreOpen,
    /// Pre-registration closed, waiting for the shuffle.
    PreClosed,
    /// Queue shuffled, waiting for ticket open.
    QueueReady,
    /// Ticketing in progress; admission batches run.
    Open,
    /// Sale over.
    Closed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Ready => "READY",
            EventStatus::PreOpen => "PRE_OPEN",
            EventStatus::PreClosed => "PRE_CLOSED",
            EventStatus::QueueReady => "QUEUE_READY",
            EventStatus::Open => "OPEN",
            EventStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(EventStatus::Ready),
            "PRE_OPEN" => Some(EventStatus::PreOpen),
            "PRE_CLOSED" => Some(EventStatus::PreClosed),
            "QUEUE_READY" => Some(EventStatus::QueueReady),
            "OPEN" => Some(EventStatus::Open),
            "CLOSED" => Some(EventStatus::Closed),
            _ => None,
        }
    }

    /// Position in the forward-only lifecycle, used to reject
    /// transitions that would move an event backwards.
    pub fn order(&self) -> u8 {
        match self {
            EventStatus::Ready => 0,
            EventStatus::PreOpen => 1,
            EventStatus::PreClosed => 2,
            EventStatus::QueueReady => 3,
            EventStatus::Open => 4,
            EventStatus::Closed => 5,
        }
    }
}

/// A sale event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,

    pub name: String,

    /// When pre-registration opens (READY -> PRE_OPEN).
    pub pre_open_at: DateTime<Utc>,

    /// When pre-registration closes (PRE_OPEN -> PRE_CLOSED).
    pub pre_close_at: DateTime<Utc>,

    /// When ticketing opens (QUEUE_READY -> OPEN).
    pub ticket_open_at: DateTime<Utc>,

    /// When ticketing closes (OPEN -> CLOSED).
    pub ticket_close_at: DateTime<Utc>,

    pub status: EventStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admission state of a queue entry.
///
/// Transitions are forward-only:
/// WAITING -> ENTERED -> { EXPIRED | COMPLETED }.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueueEntryStatus {
    /// Shuffled in, waiting for admission.
    Waiting,
    /// Admitted; may select a seat until `expires_at`.
    Entered,
    /// Entry window elapsed without payment.
    Expired,
    /// Payment confirmed.
    Completed,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEntryStatus::Waiting => "WAITING",
            QueueEntryStatus::Entered => "ENTERED",
            QueueEntryStatus::Expired => "EXPIRED",
            QueueEntryStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(QueueEntryStatus::Waiting),
            "ENTERED" => Some(QueueEntryStatus::Entered),
            "EXPIRED" => Some(QueueEntryStatus::Expired),
            "COMPLETED" => Some(QueueEntryStatus::Completed),
            _ => None,
        }
    }
}

/// A queue entry row.
///
/// Created once by the shuffle, then only ever advanced:
/// the admission processor enters it, the expiration processor
/// expires it, the payment path completes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntryRecord {
    pub id: i64,

    pub event_id: i64,

    pub user_id: i64,

    /// Position assigned by the shuffle; 1..N per event.
    pub queue_rank: i32,

    pub status: QueueEntryStatus,

    pub created_at: DateTime<Utc>,

    /// Set when the entry was promoted to ENTERED.
    pub entered_at: Option<DateTime<Utc>>,

    /// Entry-window deadline stamped at admission time.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Inventory state of a seat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SeatStatus {
    Available,
    Reserved,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Reserved => "RESERVED",
            SeatStatus::Sold => "SOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(SeatStatus::Available),
            "RESERVED" => Some(SeatStatus::Reserved),
            "SOLD" => Some(SeatStatus::Sold),
            _ => None,
        }
    }
}

/// A seat row.
///
/// Status only ever changes through atomic conditional updates
/// (`UPDATE ... WHERE status = expected`); there is no
/// read-modify-write path anywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatRecord {
    pub id: i64,

    pub event_id: i64,

    /// Human-facing code like "A1" or "B12".
    pub seat_code: String,

    /// Price tier, e.g. "VIP", "R", "S".
    pub grade: String,

    pub price: i32,

    pub status: SeatStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// State of a draft reservation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Checkout in progress; may or may not hold a seat.
    Draft,
    /// Payment confirmed.
    Completed,
    /// Swept after the entry window lapsed.
    Expired,
    /// Released when the owning queue entry was demoted.
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Draft => "DRAFT",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(ReservationStatus::Draft),
            "COMPLETED" => Some(ReservationStatus::Completed),
            "EXPIRED" => Some(ReservationStatus::Expired),
            "CANCELLED" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

/// A draft reservation row.
///
/// The ephemeral (user, event, seat?) linkage that holds inventory
/// during checkout. At most one DRAFT per (event, user); it may
/// exist with no seat attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: Uuid,

    pub event_id: i64,

    pub user_id: i64,

    /// The held seat, if one has been selected.
    pub seat_id: Option<i64>,

    pub status: ReservationStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_status_round_trip() {
        for s in [
            EventStatus::Ready,
            EventStatus::PreOpen,
            EventStatus::PreClosed,
            EventStatus::QueueReady,
            EventStatus::Open,
            EventStatus::Closed,
        ] {
            assert_eq!(EventStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(EventStatus::parse("BOGUS"), None);
    }

    #[test]
    fn test_event_status_order_is_strictly_increasing() {
        let lifecycle = [
            EventStatus::Ready,
            EventStatus::PreOpen,
            EventStatus::PreClosed,
            EventStatus::QueueReady,
            EventStatus::Open,
            EventStatus::Closed,
        ];
        for pair in lifecycle.windows(2) {
            assert!(pair[0].order() < pair[1].order());
        }
    }

    #[test]
    fn test_queue_entry_status_round_trip() {
        for s in [
            QueueEntryStatus::Waiting,
            QueueEntryStatus::Entered,
            QueueEntryStatus::Expired,
            QueueEntryStatus::Completed,
        ] {
            assert_eq!(QueueEntryStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_seat_status_round_trip() {
        for s in [SeatStatus::Available, SeatStatus::Reserved, SeatStatus::Sold] {
            assert_eq!(SeatStatus::parse(s.as_str()), Some(s));
        }
    }
}
