//! # Ticket Queue Backend Service
//!
//! Entry point for the flash-sale ticketing queue backend. It
//! provides:
//!
//! - Randomized queue admission for pre-registered users
//! - Batch promotion and expiration of queue entries
//! - Per-event lifecycle timers with crash recovery
//! - Race-free seat inventory under concurrent selection
//! - Draft reservations and payment confirmation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BACKEND SERVICE                         │
//! │                                                              │
//! │  ┌──────────────────┐   ┌─────────────────────────────────┐ │
//! │  │ Operations       │   │   Background Services           │ │
//! │  │ (called by the   │   │   • Lifecycle Scheduler         │ │
//! │  │  upstream API)   │   │   • Queue Monitor               │ │
//! │  │                  │   │     - admission batches         │ │
//! │  │  select-seat     │   │     - entry expiration          │ │
//! │  │  deselect-seat   │   │     - draft sweep               │ │
//! │  │  confirm-payment │   │                                 │ │
//! │  │  queue-status    │   │                                 │ │
//! │  └──────────────────┘   └─────────────────────────────────┘ │
//! │            │                          │                      │
//! │  ┌─────────┴──────────────────────────┴──────────────────┐  │
//! │  │                   SERVICE LAYER                        │  │
//! │  │  SeatManager · ReservationManager · QueueShuffler      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │            │                          │                      │
//! │     ┌──────┴──────┐            ┌──────┴──────┐              │
//! │     │ PostgreSQL  │            │    Redis    │              │
//! │     │ (truth)     │            │ (mirror +   │              │
//! │     │             │            │  locks)     │              │
//! │     └─────────────┘            └─────────────┘              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Start PostgreSQL and Redis
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the service: `cargo run`
//!
//! Multiple instances may run side by side; cluster-wide locks keep
//! every scheduled unit of work single-execution across the fleet.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod db;
mod lock;
mod models;
mod notify;
mod payment;
mod services;
mod utils;

use cache::QueueCache;
use config::AppConfig;
use db::Database;
use lock::LockManager;
use notify::Notifier;
use payment::MockPaymentGateway;
use services::{
    AdmissionProcessor, ExpirationProcessor, LifecycleScheduler, QueueMonitor, QueueReader,
    QueueShuffler, ReservationManager, SeatManager,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("🚀 Starting Ticket Queue Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().expect("Failed to load configuration");

    info!("📋 Configuration loaded");
    info!("   Entry window: {} minutes", config.entry_window_minutes);
    info!("   Admission batch size: {}", config.admission_batch_size);

    // =========================================
    // STEP 3: Initialize Storage
    // =========================================
    let db = Database::connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    info!("🗄️  Database connected");

    db.run_migrations().await.expect("Failed to run migrations");

    info!("📦 Database migrations complete");

    let cache = QueueCache::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis cache");

    let lock = LockManager::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis lock store");

    info!("⚡ Redis mirror and lock store connected");

    // =========================================
    // STEP 4: Initialize Services
    // =========================================
    let notifier = Notifier::new();
    let gateway = Arc::new(MockPaymentGateway::new());

    let seats = SeatManager::new(db.clone(), notifier.clone());
    let queue_reader = QueueReader::new(db.clone(), cache.clone());
    let reservations = ReservationManager::new(
        db.clone(),
        seats.clone(),
        queue_reader.clone(),
        cache.clone(),
        notifier.clone(),
        gateway,
    );

    let shuffler = QueueShuffler::new(db.clone(), cache.clone(), lock.clone());
    let admission = AdmissionProcessor::new(
        db.clone(),
        cache.clone(),
        notifier.clone(),
        config.entry_window_minutes,
        config.admission_batch_size,
    );
    let expiration = ExpirationProcessor::new(
        db.clone(),
        cache.clone(),
        notifier.clone(),
        reservations.clone(),
        config.entry_window_minutes,
    );

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Recover Scheduled Lifecycles
    // =========================================
    // In-memory timers did not survive the last shutdown; re-arm
    // every event that still has a future transition.
    let scheduler = LifecycleScheduler::new(
        db.clone(),
        lock.clone(),
        shuffler.clone(),
        config.shuffle_lead_minutes,
    );

    scheduler
        .recover_on_startup()
        .await
        .expect("Failed to recover event schedules");

    info!("⏰ Lifecycle scheduler recovered");

    // =========================================
    // STEP 6: Start Background Jobs
    // =========================================
    let monitor = QueueMonitor::new(admission, expiration, lock.clone(), config.clone());

    tokio::spawn(async move {
        monitor.start().await;
    });

    info!("👁️  Queue monitor started");

    // =========================================
    // STEP 7: Run Until Shutdown
    // =========================================
    info!("✅ Service up; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");

    Ok(())
}
