//! # Lifecycle Scheduler Service
//!
//! Fires per-event status transitions at their configured instants
//! and triggers the queue shuffle ahead of ticket open.
//!
//! Two independent layers keep this correct on a fleet:
//!
//! - a **node-local task registry** (map of task key -> abortable
//!   handle) that exists only so this node can cancel and dedup its
//!   own timers on event update/delete. It carries no cross-node
//!   meaning whatsoever.
//! - the **cluster-wide lock** taken inside every fired task, keyed
//!   by (event, target). Every instance arms the same timers; the
//!   lock is the only thing deciding which one acts.
//!
//! Fired tasks re-load the event fresh - the snapshot taken at
//! scheduling time is stale by definition. In-memory timers die with
//! the process, so the startup recovery pass re-arms everything with
//! a future instant from storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::histogram;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue_shuffler::QueueShuffler;
use crate::db::{queries, Database, EventRecord, EventStatus};
use crate::lock::{transition_lock_name, LockManager, LockOutcome};
use crate::utils::duration_until;

/// Errors that can occur while scheduling event lifecycles.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Event does not exist.
    #[error("Event not found: {0}")]
    NotFound(i64),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// The lock provider failed.
    #[error("Lock provider error: {0}")]
    Lock(String),
}

impl From<crate::db::DatabaseError> for EventError {
    fn from(e: crate::db::DatabaseError) -> Self {
        EventError::Database(e.to_string())
    }
}

/// The kinds of scheduled work an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    PreOpen,
    PreClose,
    TicketOpen,
    TicketClose,
    Shuffle,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PreOpen => "PRE_OPEN",
            TaskType::PreClose => "PRE_CLOSE",
            TaskType::TicketOpen => "TICKET_OPEN",
            TaskType::TicketClose => "TICKET_CLOSE",
            TaskType::Shuffle => "SHUFFLE",
        }
    }

    /// The status a transition task drives the event to. `None` for
    /// the shuffle, which is not a status transition.
    pub fn target_status(&self) -> Option<EventStatus> {
        match self {
            TaskType::PreOpen => Some(EventStatus::PreOpen),
            TaskType::PreClose => Some(EventStatus::PreClosed),
            TaskType::TicketOpen => Some(EventStatus::Open),
            TaskType::TicketClose => Some(EventStatus::Closed),
            TaskType::Shuffle => None,
        }
    }
}

fn task_key(event_id: i64, task_type: TaskType) -> String {
    format!("{}-{}", event_id, task_type.as_str())
}

/// The tasks an event needs from `now` on. Instants already in the
/// past are skipped on purpose - they are assumed handled (by a
/// previous run of this process, or by another instance).
fn plan_tasks(
    event: &EventRecord,
    shuffle_lead: Duration,
    now: DateTime<Utc>,
) -> Vec<(TaskType, DateTime<Utc>)> {
    let mut tasks = Vec::new();

    let shuffle_at = event.ticket_open_at - shuffle_lead;

    let candidates = [
        (TaskType::PreOpen, event.pre_open_at),
        (TaskType::PreClose, event.pre_close_at),
        (TaskType::Shuffle, shuffle_at),
        (TaskType::TicketOpen, event.ticket_open_at),
        (TaskType::TicketClose, event.ticket_close_at),
    ];

    for (task_type, at) in candidates {
        if at > now {
            tasks.push((task_type, at));
        }
    }

    tasks
}

/// The per-event lifecycle scheduler.
pub struct LifecycleScheduler {
    db: Database,
    lock: LockManager,
    shuffler: QueueShuffler,

    /// How far ahead of ticket open the shuffle fires.
    shuffle_lead: Duration,

    /// Node-local registry of armed timers, keyed by
    /// `{event_id}-{TASK_TYPE}`. Cancel/dedup on this node only.
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl LifecycleScheduler {
    pub fn new(
        db: Database,
        lock: LockManager,
        shuffler: QueueShuffler,
        shuffle_lead_minutes: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            lock,
            shuffler,
            shuffle_lead: Duration::minutes(shuffle_lead_minutes),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    // ==========================================
    // EVENT HOOKS
    // ==========================================

    /// Arm timers for a newly created event.
    #[allow(dead_code)] // invoked by the upstream admin layer
    pub async fn on_event_created(self: &Arc<Self>, event_id: i64) -> Result<(), EventError> {
        self.schedule_lifecycle(event_id).await
    }

    /// Re-arm timers after an event's timestamps changed: every
    /// previously scheduled task for the event is cancelled first.
    #[allow(dead_code)] // invoked by the upstream admin layer
    pub async fn on_event_updated(self: &Arc<Self>, event_id: i64) -> Result<(), EventError> {
        self.cancel_event_tasks(event_id);
        self.schedule_lifecycle(event_id).await
    }

    /// Drop all timers for a deleted event.
    #[allow(dead_code)] // invoked by the upstream admin layer
    pub fn on_event_deleted(&self, event_id: i64) {
        self.cancel_event_tasks(event_id);
    }

    /// Startup recovery: re-arm timers for every event that still
    /// has a lifecycle instant ahead. Mandatory - the registry is
    /// process memory and did not survive the restart.
    pub async fn recover_on_startup(self: &Arc<Self>) -> Result<(), EventError> {
        let upcoming = queries::find_upcoming_events(self.db.pool(), Utc::now()).await?;

        let mut success = 0usize;
        let mut failed = 0usize;

        for event in upcoming {
            match self.schedule_lifecycle(event.id).await {
                Ok(()) => success += 1,
                Err(e) => {
                    failed += 1;
                    error!(event_id = event.id, error = %e, "EVENT_LIFECYCLE_RECOVERY_FAIL");
                }
            }
        }

        info!(success, failed, "EVENT_LIFECYCLE_RECOVERY_COMPLETE");

        Ok(())
    }

    // ==========================================
    // SCHEDULING
    // ==========================================

    async fn schedule_lifecycle(self: &Arc<Self>, event_id: i64) -> Result<(), EventError> {
        let event = queries::get_event(self.db.pool(), event_id)
            .await?
            .ok_or(EventError::NotFound(event_id))?;

        let planned = plan_tasks(&event, self.shuffle_lead, Utc::now());
        let count = planned.len();

        for (task_type, run_at) in planned {
            self.schedule_task(event_id, task_type, run_at);
        }

        info!(event_id, tasks = count, "EVENT_LIFECYCLE_SCHEDULED");

        Ok(())
    }

    /// Arm one timer, replacing any existing timer under the same
    /// key on this node.
    fn schedule_task(self: &Arc<Self>, event_id: i64, task_type: TaskType, run_at: DateTime<Utc>) {
        let key = task_key(event_id, task_type);
        let delay = duration_until(run_at);

        let scheduler = Arc::clone(self);
        let spawn_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.run_fired_task(&spawn_key, event_id, task_type).await;
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = tasks.insert(key.clone(), handle) {
            existing.abort();
            debug!(task = %key, "Replaced existing scheduled task");
        }
    }

    fn cancel_event_tasks(&self, event_id: i64) {
        let prefix = format!("{}-", event_id);
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());

        tasks.retain(|key, handle| {
            if key.starts_with(&prefix) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    // ==========================================
    // FIRED TASKS
    // ==========================================

    /// Body of every armed timer: run the work, record timing, and
    /// drop the registry entry no matter how the work went.
    async fn run_fired_task(self: &Arc<Self>, key: &str, event_id: i64, task_type: TaskType) {
        let started = Instant::now();

        let result = match task_type {
            TaskType::Shuffle => self
                .shuffler
                .shuffle(event_id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            _ => {
                // Transition tasks always carry a target
                match task_type.target_status() {
                    Some(target) => self
                        .transition_status(event_id, target)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Ok(()),
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as f64;
        histogram!("scheduler_task_duration_ms", "task" => task_type.as_str())
            .record(duration_ms);

        match result {
            Ok(()) => info!(task = %key, duration_ms, "SCHED_DYNAMIC_SUCCESS"),
            Err(error) => error!(task = %key, duration_ms, error, "SCHED_DYNAMIC_FAIL"),
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.remove(key);
    }

    /// Execute one status transition under the cluster-wide lock.
    ///
    /// The event is re-loaded fresh inside the lock; the snapshot
    /// from scheduling time is never trusted. Not acquiring the lock
    /// means another instance handled (or is handling) the same
    /// transition, and this task is a no-op.
    async fn transition_status(&self, event_id: i64, target: EventStatus) -> Result<(), EventError> {
        let lock_name = transition_lock_name(event_id, target.as_str());

        let outcome = self
            .lock
            .execute_with_default_lock(&lock_name, || async {
                let event = queries::get_event(self.db.pool(), event_id)
                    .await?
                    .ok_or(EventError::NotFound(event_id))?;

                // Forward-only: an event already at or past the
                // target does not move
                if event.status.order() >= target.order() {
                    debug!(
                        event_id,
                        current = event.status.as_str(),
                        target = target.as_str(),
                        "Event already at or past target status"
                    );
                    return Ok(());
                }

                let advanced = queries::advance_event_status(
                    self.db.pool(),
                    event_id,
                    event.status,
                    target,
                )
                .await?;

                if advanced == 1 {
                    info!(
                        event_id,
                        from = event.status.as_str(),
                        to = target.as_str(),
                        "Event status advanced"
                    );
                } else {
                    // Raced with an admin update between the read
                    // and the conditional write
                    warn!(
                        event_id,
                        target = target.as_str(),
                        "Event status moved concurrently, transition skipped"
                    );
                }

                Ok(())
            })
            .await
            .map_err(|e| EventError::Lock(e.to_string()))?;

        match outcome {
            LockOutcome::Executed(result) => result,
            LockOutcome::Skipped => {
                warn!(
                    event_id,
                    target = target.as_str(),
                    "EVENT_TRANSITION_SKIPPED_LOCKED"
                );
                Ok(())
            }
        }
    }

    /// Number of timers currently armed on this node.
    #[allow(dead_code)]
    pub fn armed_task_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(now: DateTime<Utc>) -> EventRecord {
        EventRecord {
            id: 1,
            name: "sample".into(),
            pre_open_at: now + Duration::hours(1),
            pre_close_at: now + Duration::hours(2),
            ticket_open_at: now + Duration::hours(4),
            ticket_close_at: now + Duration::hours(6),
            status: EventStatus::Ready,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_task_key_format() {
        assert_eq!(task_key(42, TaskType::TicketOpen), "42-TICKET_OPEN");
        assert_eq!(task_key(42, TaskType::Shuffle), "42-SHUFFLE");
    }

    #[test]
    fn test_plan_tasks_all_future() {
        let now = Utc::now();
        let event = sample_event(now);

        let planned = plan_tasks(&event, Duration::hours(1), now);

        assert_eq!(planned.len(), 5);
        // The shuffle lands at ticket_open - lead
        let (_, shuffle_at) = planned
            .iter()
            .find(|(t, _)| *t == TaskType::Shuffle)
            .unwrap();
        assert_eq!(*shuffle_at, event.ticket_open_at - Duration::hours(1));
    }

    #[test]
    fn test_plan_tasks_skips_past_instants() {
        let now = Utc::now();
        let mut event = sample_event(now);

        // Pre-registration already over, shuffle instant also past
        event.pre_open_at = now - Duration::hours(3);
        event.pre_close_at = now - Duration::hours(2);
        event.ticket_open_at = now + Duration::minutes(30);
        event.ticket_close_at = now + Duration::hours(2);

        let planned = plan_tasks(&event, Duration::hours(1), now);

        let types: Vec<TaskType> = planned.iter().map(|(t, _)| *t).collect();
        assert_eq!(types, vec![TaskType::TicketOpen, TaskType::TicketClose]);
    }

    #[test]
    fn test_transition_targets() {
        assert_eq!(TaskType::PreOpen.target_status(), Some(EventStatus::PreOpen));
        assert_eq!(TaskType::TicketOpen.target_status(), Some(EventStatus::Open));
        assert_eq!(TaskType::TicketClose.target_status(), Some(EventStatus::Closed));
        assert_eq!(TaskType::Shuffle.target_status(), None);
    }
}
