//! # Services Module
//!
//! Core business logic for the flash-sale queue backend. Each
//! service handles one domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `QueueShuffler` | One-time randomized admission order per event |
//! | `AdmissionProcessor` | WAITING -> ENTERED promotion in batches |
//! | `ExpirationProcessor` | ENTERED -> EXPIRED demotion, seat release, draft sweep |
//! | `LifecycleScheduler` | Per-event status transitions at precise instants |
//! | `QueueMonitor` | Periodic job loop (admission / expiration / sweep) |
//! | `SeatManager` | Atomic seat inventory transitions |
//! | `ReservationManager` | Draft reservations, seat selection, payment |
//! | `QueueReader` | Admission checks and queue status reads |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      SERVICES LAYER                         │
//! │                                                             │
//! │  LifecycleScheduler ──► QueueShuffler                       │
//! │         │                                                   │
//! │         ▼                                                   │
//! │  QueueMonitor ──► AdmissionProcessor / ExpirationProcessor  │
//! │                                  │                          │
//! │                                  ▼                          │
//! │  ReservationManager ──────► SeatManager                     │
//! │         │                                                   │
//! │         └──► QueueReader                                    │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod admission;
pub mod expiration;
#[cfg(test)]
mod flow_tests;
pub mod lifecycle_scheduler;
pub mod queue_monitor;
pub mod queue_reader;
pub mod queue_shuffler;
pub mod reservation_manager;
pub mod seat_manager;

pub use admission::{AdmissionProcessor, QueueError};
pub use expiration::ExpirationProcessor;
pub use lifecycle_scheduler::{EventError, LifecycleScheduler, TaskType};
pub use queue_monitor::QueueMonitor;
pub use queue_reader::QueueReader;
pub use queue_shuffler::{QueueShuffler, ShuffleError, ShuffleOutcome};
pub use reservation_manager::{ReservationError, ReservationManager};
pub use seat_manager::{SeatError, SeatManager};
