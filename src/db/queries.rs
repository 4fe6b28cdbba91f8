//! # Database Queries
//!
//! All SQL for the backend lives here. Each function performs one
//! database operation against the pool.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `event_*` / `*_event*` - events table
//! - `*_pre_regist*` - pre_registrations table
//! - `*_queue_*` / `*_entry_*` - queue_entries table
//! - `*_seat*` - seats table
//! - `*_reservation*` / `*_draft*` - reservations table
//!
//! ## Conditional updates
//!
//! Every state transition on seats, queue entries, events, and
//! reservations is a single `UPDATE ... WHERE status = $expected`.
//! Callers inspect the affected-row count: 1 means the transition
//! won, 0 means it lost (and the caller re-reads to find out why).

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;

// ============================================
// ROW CONVERTERS
// ============================================

fn row_to_event(row: &Row) -> Result<EventRecord, DatabaseError> {
    let status: String = row.get("status");
    Ok(EventRecord {
        id: row.get("id"),
        name: row.get("name"),
        pre_open_at: row.get("pre_open_at"),
        pre_close_at: row.get("pre_close_at"),
        ticket_open_at: row.get("ticket_open_at"),
        ticket_close_at: row.get("ticket_close_at"),
        status: EventStatus::parse(&status)
            .ok_or_else(|| DatabaseError::CorruptRow(format!("event status '{}'", status)))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_queue_entry(row: &Row) -> Result<QueueEntryRecord, DatabaseError> {
    let status: String = row.get("status");
    Ok(QueueEntryRecord {
        id: row.get("id"),
        event_id: row.get("event_id"),
        user_id: row.get("user_id"),
        queue_rank: row.get("queue_rank"),
        status: QueueEntryStatus::parse(&status)
            .ok_or_else(|| DatabaseError::CorruptRow(format!("entry status '{}'", status)))?,
        created_at: row.get("created_at"),
        entered_at: row.get("entered_at"),
        expires_at: row.get("expires_at"),
    })
}

fn row_to_seat(row: &Row) -> Result<SeatRecord, DatabaseError> {
    let status: String = row.get("status");
    Ok(SeatRecord {
        id: row.get("id"),
        event_id: row.get("event_id"),
        seat_code: row.get("seat_code"),
        grade: row.get("grade"),
        price: row.get("price"),
        status: SeatStatus::parse(&status)
            .ok_or_else(|| DatabaseError::CorruptRow(format!("seat status '{}'", status)))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_reservation(row: &Row) -> Result<ReservationRecord, DatabaseError> {
    let status: String = row.get("status");
    Ok(ReservationRecord {
        id: row.get("id"),
        event_id: row.get("event_id"),
        user_id: row.get("user_id"),
        seat_id: row.get("seat_id"),
        status: ReservationStatus::parse(&status)
            .ok_or_else(|| DatabaseError::CorruptRow(format!("reservation status '{}'", status)))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

async fn client(pool: &Pool) -> Result<deadpool_postgres::Object, DatabaseError> {
    pool.get()
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))
}

// ============================================
// EVENT QUERIES
// ============================================

/// Get an event by id.
pub async fn get_event(pool: &Pool, event_id: i64) -> Result<Option<EventRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, name, pre_open_at, pre_close_at, ticket_open_at,
                   ticket_close_at, status, created_at, updated_at
            FROM events
            WHERE id = $1
            "#,
            &[&event_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_event(row)?)),
        None => Ok(None),
    }
}

/// Get all events currently in a given status.
pub async fn find_events_by_status(
    pool: &Pool,
    status: EventStatus,
) -> Result<Vec<EventRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, name, pre_open_at, pre_close_at, ticket_open_at,
                   ticket_close_at, status, created_at, updated_at
            FROM events
            WHERE status = $1
            ORDER BY ticket_open_at
            "#,
            &[&status.as_str()],
        )
        .await?;

    rows.iter().map(row_to_event).collect()
}

/// Get all events that still have a lifecycle instant ahead of `now`.
///
/// Used by the scheduler's startup recovery pass to re-register
/// timers lost with the previous process.
pub async fn find_upcoming_events(
    pool: &Pool,
    now: DateTime<Utc>,
) -> Result<Vec<EventRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, name, pre_open_at, pre_close_at, ticket_open_at,
                   ticket_close_at, status, created_at, updated_at
            FROM events
            WHERE ticket_close_at > $1
              AND status <> 'CLOSED'
            ORDER BY ticket_open_at
            "#,
            &[&now],
        )
        .await?;

    rows.iter().map(row_to_event).collect()
}

/// Advance an event's status, conditionally.
///
/// Returns the affected-row count: 0 means the event was no longer
/// in `from` (another instance advanced it first, or the admin moved
/// it) and the caller must not treat the transition as applied.
pub async fn advance_event_status(
    pool: &Pool,
    event_id: i64,
    from: EventStatus,
    to: EventStatus,
) -> Result<u64, DatabaseError> {
    debug!(
        "Advancing event {} status: {} -> {}",
        event_id,
        from.as_str(),
        to.as_str()
    );

    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE events
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
            &[&event_id, &from.as_str(), &to.as_str()],
        )
        .await?;

    Ok(affected)
}

/// Create an event. Used by admin setup and tests.
#[allow(dead_code)]
pub async fn create_event(
    pool: &Pool,
    name: &str,
    pre_open_at: DateTime<Utc>,
    pre_close_at: DateTime<Utc>,
    ticket_open_at: DateTime<Utc>,
    ticket_close_at: DateTime<Utc>,
) -> Result<EventRecord, DatabaseError> {
    let client = client(pool).await?;

    let row = client
        .query_one(
            r#"
            INSERT INTO events (name, pre_open_at, pre_close_at,
                                ticket_open_at, ticket_close_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, pre_open_at, pre_close_at, ticket_open_at,
                      ticket_close_at, status, created_at, updated_at
            "#,
            &[&name, &pre_open_at, &pre_close_at, &ticket_open_at, &ticket_close_at],
        )
        .await?;

    row_to_event(&row)
}

// ============================================
// PRE-REGISTRATION QUERIES
// ============================================

/// Register a user for an event's queue. Duplicate registrations
/// are ignored.
#[allow(dead_code)] // invoked by the upstream pre-registration API
pub async fn create_pre_registration(
    pool: &Pool,
    event_id: i64,
    user_id: i64,
) -> Result<(), DatabaseError> {
    let client = client(pool).await?;

    client
        .execute(
            r#"
            INSERT INTO pre_registrations (event_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (event_id, user_id) DO NOTHING
            "#,
            &[&event_id, &user_id],
        )
        .await?;

    Ok(())
}

/// All user ids pre-registered for an event, in registration order.
pub async fn find_pre_registered_user_ids(
    pool: &Pool,
    event_id: i64,
) -> Result<Vec<i64>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT user_id FROM pre_registrations
            WHERE event_id = $1
            ORDER BY id
            "#,
            &[&event_id],
        )
        .await?;

    Ok(rows.iter().map(|r| r.get("user_id")).collect())
}

// ============================================
// QUEUE ENTRY QUERIES
// ============================================

/// Count all queue entries for an event (any status).
pub async fn count_queue_entries(pool: &Pool, event_id: i64) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;

    let row = client
        .query_one(
            "SELECT COUNT(*) AS count FROM queue_entries WHERE event_id = $1",
            &[&event_id],
        )
        .await?;

    Ok(row.get("count"))
}

/// Bulk-insert WAITING entries for a freshly shuffled queue.
///
/// `user_ids[i]` receives `ranks[i]`; the two slices must be the
/// same length.
pub async fn insert_queue_entries(
    pool: &Pool,
    event_id: i64,
    user_ids: &[i64],
    ranks: &[i32],
) -> Result<u64, DatabaseError> {
    debug!(
        "Bulk-inserting {} queue entries for event {}",
        user_ids.len(),
        event_id
    );

    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            INSERT INTO queue_entries (event_id, user_id, queue_rank, status)
            SELECT $1, u, r, 'WAITING'
            FROM UNNEST($2::bigint[], $3::int[]) AS t(u, r)
            "#,
            &[&event_id, &user_ids, &ranks],
        )
        .await?;

    Ok(affected)
}

/// Get a queue entry by (event, user).
pub async fn get_queue_entry(
    pool: &Pool,
    event_id: i64,
    user_id: i64,
) -> Result<Option<QueueEntryRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, user_id, queue_rank, status,
                   created_at, entered_at, expires_at
            FROM queue_entries
            WHERE event_id = $1 AND user_id = $2
            "#,
            &[&event_id, &user_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_queue_entry(row)?)),
        None => Ok(None),
    }
}

/// The top `limit` WAITING entries for an event, by rank.
///
/// Rank order here is advisory iteration order for the admission
/// batch; it is not a cross-instance FIFO guarantee.
pub async fn find_top_waiting(
    pool: &Pool,
    event_id: i64,
    limit: i64,
) -> Result<Vec<QueueEntryRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, user_id, queue_rank, status,
                   created_at, entered_at, expires_at
            FROM queue_entries
            WHERE event_id = $1 AND status = 'WAITING'
            ORDER BY queue_rank
            LIMIT $2
            "#,
            &[&event_id, &limit],
        )
        .await?;

    rows.iter().map(row_to_queue_entry).collect()
}

/// Promote an entry WAITING -> ENTERED, stamping the entry window.
///
/// Returns 0 if the entry was not WAITING anymore.
pub async fn mark_entry_entered(
    pool: &Pool,
    event_id: i64,
    user_id: i64,
    entered_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE queue_entries
            SET status = 'ENTERED', entered_at = $3, expires_at = $4
            WHERE event_id = $1 AND user_id = $2 AND status = 'WAITING'
            "#,
            &[&event_id, &user_id, &entered_at, &expires_at],
        )
        .await?;

    Ok(affected)
}

/// Demote an entry ENTERED -> EXPIRED.
///
/// Returns 0 if the entry was not ENTERED (already expired, or raced
/// to COMPLETED by a concurrent payment).
pub async fn mark_entry_expired(
    pool: &Pool,
    event_id: i64,
    user_id: i64,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE queue_entries
            SET status = 'EXPIRED'
            WHERE event_id = $1 AND user_id = $2 AND status = 'ENTERED'
            "#,
            &[&event_id, &user_id],
        )
        .await?;

    Ok(affected)
}

/// Complete an entry ENTERED -> COMPLETED on payment confirmation.
pub async fn mark_entry_completed(
    pool: &Pool,
    event_id: i64,
    user_id: i64,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE queue_entries
            SET status = 'COMPLETED'
            WHERE event_id = $1 AND user_id = $2 AND status = 'ENTERED'
            "#,
            &[&event_id, &user_id],
        )
        .await?;

    Ok(affected)
}

/// All ENTERED entries whose deadline is strictly past.
pub async fn find_overdue_entries(
    pool: &Pool,
    now: DateTime<Utc>,
) -> Result<Vec<QueueEntryRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, user_id, queue_rank, status,
                   created_at, entered_at, expires_at
            FROM queue_entries
            WHERE status = 'ENTERED' AND expires_at < $1
            ORDER BY expires_at
            "#,
            &[&now],
        )
        .await?;

    rows.iter().map(row_to_queue_entry).collect()
}

/// How many WAITING entries sit ahead of the given rank.
pub async fn count_waiting_ahead(
    pool: &Pool,
    event_id: i64,
    queue_rank: i32,
) -> Result<i64, DatabaseError> {
    let client = client(pool).await?;

    let row = client
        .query_one(
            r#"
            SELECT COUNT(*) AS count FROM queue_entries
            WHERE event_id = $1 AND status = 'WAITING' AND queue_rank < $2
            "#,
            &[&event_id, &queue_rank],
        )
        .await?;

    Ok(row.get("count"))
}

// ============================================
// SEAT QUERIES
// ============================================

/// Get a seat by (event, id).
pub async fn get_seat(
    pool: &Pool,
    event_id: i64,
    seat_id: i64,
) -> Result<Option<SeatRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, seat_code, grade, price, status,
                   created_at, updated_at
            FROM seats
            WHERE event_id = $1 AND id = $2
            "#,
            &[&event_id, &seat_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_seat(row)?)),
        None => Ok(None),
    }
}

/// All seats for an event, ordered for display.
pub async fn find_seats_by_event(
    pool: &Pool,
    event_id: i64,
) -> Result<Vec<SeatRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, seat_code, grade, price, status,
                   created_at, updated_at
            FROM seats
            WHERE event_id = $1
            ORDER BY grade, seat_code
            "#,
            &[&event_id],
        )
        .await?;

    rows.iter().map(row_to_seat).collect()
}

/// The seat CAS primitive: change status only if it currently
/// matches `from`.
///
/// Returns the affected-row count. 1 = this caller won the
/// transition; 0 = the seat was not in `from` (lost a race, or the
/// seat does not exist) and the caller re-reads to disambiguate.
pub async fn update_seat_status_if_match(
    pool: &Pool,
    event_id: i64,
    seat_id: i64,
    from: SeatStatus,
    to: SeatStatus,
) -> Result<u64, DatabaseError> {
    debug!(
        "Seat CAS event={} seat={} {} -> {}",
        event_id,
        seat_id,
        from.as_str(),
        to.as_str()
    );

    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE seats
            SET status = $4, updated_at = NOW()
            WHERE event_id = $1 AND id = $2 AND status = $3
            "#,
            &[&event_id, &seat_id, &from.as_str(), &to.as_str()],
        )
        .await?;

    Ok(affected)
}

/// Create a seat. Used by event setup and tests.
#[allow(dead_code)]
pub async fn create_seat(
    pool: &Pool,
    event_id: i64,
    seat_code: &str,
    grade: &str,
    price: i32,
) -> Result<SeatRecord, DatabaseError> {
    let client = client(pool).await?;

    let row = client
        .query_one(
            r#"
            INSERT INTO seats (event_id, seat_code, grade, price)
            VALUES ($1, $2, $3, $4)
            RETURNING id, event_id, seat_code, grade, price, status,
                      created_at, updated_at
            "#,
            &[&event_id, &seat_code, &grade, &price],
        )
        .await?;

    row_to_seat(&row)
}

// ============================================
// RESERVATION QUERIES
// ============================================

/// Get the user's DRAFT reservation for an event, if any.
pub async fn get_draft_reservation(
    pool: &Pool,
    event_id: i64,
    user_id: i64,
) -> Result<Option<ReservationRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, user_id, seat_id, status,
                   created_at, updated_at
            FROM reservations
            WHERE event_id = $1 AND user_id = $2 AND status = 'DRAFT'
            "#,
            &[&event_id, &user_id],
        )
        .await?;

    match rows.first() {
        Some(row) => Ok(Some(row_to_reservation(row)?)),
        None => Ok(None),
    }
}

/// Insert a DRAFT reservation unless one already exists for the
/// (event, user) pair. The partial unique index makes concurrent
/// creators converge on a single row.
pub async fn insert_draft_reservation(
    pool: &Pool,
    id: Uuid,
    event_id: i64,
    user_id: i64,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            INSERT INTO reservations (id, event_id, user_id, status)
            VALUES ($1, $2, $3, 'DRAFT')
            ON CONFLICT (event_id, user_id) WHERE status = 'DRAFT' DO NOTHING
            "#,
            &[&id, &event_id, &user_id],
        )
        .await?;

    Ok(affected)
}

/// Attach a seat to a draft reservation.
pub async fn assign_reservation_seat(
    pool: &Pool,
    reservation_id: Uuid,
    seat_id: i64,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE reservations
            SET seat_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'DRAFT'
            "#,
            &[&reservation_id, &seat_id],
        )
        .await?;

    Ok(affected)
}

/// Detach the seat from a draft reservation, leaving the draft
/// itself intact for reuse.
pub async fn clear_reservation_seat(
    pool: &Pool,
    reservation_id: Uuid,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE reservations
            SET seat_id = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'DRAFT'
            "#,
            &[&reservation_id],
        )
        .await?;

    Ok(affected)
}

/// Move a reservation out of DRAFT, conditionally.
pub async fn finish_draft_reservation(
    pool: &Pool,
    reservation_id: Uuid,
    to: ReservationStatus,
) -> Result<u64, DatabaseError> {
    let client = client(pool).await?;

    let affected = client
        .execute(
            r#"
            UPDATE reservations
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'DRAFT'
            "#,
            &[&reservation_id, &to.as_str()],
        )
        .await?;

    Ok(affected)
}

/// DRAFT reservations created before `cutoff`, oldest first.
///
/// The sweep caps each run with `limit` so one pass never holds the
/// job lock for too long.
pub async fn find_stale_drafts(
    pool: &Pool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ReservationRecord>, DatabaseError> {
    let client = client(pool).await?;

    let rows = client
        .query(
            r#"
            SELECT id, event_id, user_id, seat_id, status,
                   created_at, updated_at
            FROM reservations
            WHERE status = 'DRAFT' AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            "#,
            &[&cutoff, &limit],
        )
        .await?;

    rows.iter().map(row_to_reservation).collect()
}
