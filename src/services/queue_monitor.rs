//! # Queue Monitor Service
//!
//! The background loop driving the periodic queue jobs:
//!
//! ```text
//! QueueMonitor (background task)
//!              │
//!              ├── Every 10s: promote WAITING entries for OPEN events
//!              │
//!              ├── Every 30s: expire overdue ENTERED entries
//!              │
//!              └── Every 60s: sweep stale draft reservations
//! ```
//!
//! Every instance of the backend runs this loop; each tick takes a
//! cluster-wide lock first, so exactly one instance executes a given
//! job at a time and the rest skip. A job failure is logged and the
//! loop keeps ticking.

use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, error, info};

use super::admission::{AdmissionProcessor, QueueError};
use super::expiration::ExpirationProcessor;
use crate::config::AppConfig;
use crate::lock::{LockManager, LockOutcome};
use crate::models::BatchOutcome;

/// Lock bounds per job, mirroring how long each is allowed to run.
const ADMISSION_LOCK_AT_MOST: Duration = Duration::from_secs(120);
const ADMISSION_LOCK_AT_LEAST: Duration = Duration::from_secs(5);
const EXPIRE_LOCK_AT_MOST: Duration = Duration::from_secs(300);
const EXPIRE_LOCK_AT_LEAST: Duration = Duration::from_secs(10);

/// The periodic queue job runner.
#[derive(Clone)]
pub struct QueueMonitor {
    admission: AdmissionProcessor,
    expiration: ExpirationProcessor,
    lock: LockManager,
    config: AppConfig,
}

impl QueueMonitor {
    pub fn new(
        admission: AdmissionProcessor,
        expiration: ExpirationProcessor,
        lock: LockManager,
        config: AppConfig,
    ) -> Self {
        Self {
            admission,
            expiration,
            lock,
            config,
        }
    }

    /// Run the job loop. Never returns; spawn it.
    pub async fn start(&self) {
        info!("Starting queue monitor");

        let mut admission_ticker =
            interval(Duration::from_secs(self.config.admission_interval_secs));
        let mut expiration_ticker =
            interval(Duration::from_secs(self.config.expiration_interval_secs));
        let mut draft_ticker =
            interval(Duration::from_secs(self.config.draft_sweep_interval_secs));

        loop {
            tokio::select! {
                _ = admission_ticker.tick() => {
                    self.run_job(
                        "QueueEntry",
                        ADMISSION_LOCK_AT_MOST,
                        ADMISSION_LOCK_AT_LEAST,
                        self.admission.process_open_events(),
                    )
                    .await;
                }

                _ = expiration_ticker.tick() => {
                    self.run_job(
                        "QueueExpire",
                        EXPIRE_LOCK_AT_MOST,
                        EXPIRE_LOCK_AT_LEAST,
                        self.expiration.expire_overdue(),
                    )
                    .await;
                }

                _ = draft_ticker.tick() => {
                    self.run_job(
                        "DraftExpiration",
                        EXPIRE_LOCK_AT_MOST,
                        EXPIRE_LOCK_AT_LEAST,
                        self.expiration.expire_stale_drafts(),
                    )
                    .await;
                }
            }
        }
    }

    /// Run one tick of a job under its cluster-wide lock, with the
    /// start/end log frame every job shares.
    async fn run_job<F>(
        &self,
        job: &'static str,
        at_most: Duration,
        at_least: Duration,
        work: F,
    ) where
        F: std::future::Future<Output = Result<BatchOutcome, QueueError>>,
    {
        let started = Instant::now();

        let outcome = self
            .lock
            .execute_with_lock(job, at_most, at_least, || work)
            .await;

        let duration_ms = started.elapsed().as_millis();

        match outcome {
            Ok(LockOutcome::Executed(Ok(batch))) => {
                if batch.processed > 0 || batch.failed > 0 {
                    info!(
                        job,
                        processed = batch.processed,
                        failed = batch.failed,
                        duration_ms,
                        "SCHED_END"
                    );
                }
            }
            Ok(LockOutcome::Executed(Err(e))) => {
                error!(job, duration_ms, error = %e, "SCHED_FAIL");
            }
            Ok(LockOutcome::Skipped) => {
                debug!(job, "SCHED_SKIPPED_LOCKED");
            }
            Err(e) => {
                error!(job, duration_ms, error = %e, "SCHED_LOCK_FAIL");
            }
        }
    }
}
