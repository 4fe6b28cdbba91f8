//! # Database Module
//!
//! All persistent state lives in PostgreSQL: events, the
//! pre-registration roster, queue entries, seats, and draft
//! reservations. These rows are the sole source of truth; the
//! Redis mirror in `crate::cache` is advisory and may drift.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    DATABASE LAYER                        │
//! │                                                          │
//! │  ┌───────────────────────────────────────────────────┐  │
//! │  │          Connection Pool (deadpool-postgres)       │  │
//! │  └───────────────────────────────────────────────────┘  │
//! │                          │                               │
//! │     ┌──────────┬─────────┼──────────┬─────────────┐     │
//! │     ▼          ▼         ▼          ▼             ▼     │
//! │  events  queue_entries  seats  reservations  pre_regs   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod models;
pub mod queries;

use deadpool_postgres::{Config, Pool, Runtime};
use thiserror::Error;
use tokio_postgres::{Config as TokioConfig, NoTls};
use tracing::{debug, info, warn};

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to connect to the database
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryError(#[from] tokio_postgres::Error),

    /// Migration failed
    #[error("Migration failed: {0}")]
    MigrationError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A row carried a status string the application does not know
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Database connection wrapper.
///
/// Wraps the deadpool connection pool; the query functions in
/// [`queries`] take `&Pool` directly.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Connect to the PostgreSQL database.
    ///
    /// Creates a connection pool (max 10 connections) and verifies
    /// connectivity with a probe query.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        info!("Connecting to database...");

        let tokio_config = database_url
            .parse::<TokioConfig>()
            .map_err(|e| DatabaseError::ConfigError(format!("Invalid database URL: {}", e)))?;

        let mut config = Config::new();

        if let Some(dbname) = tokio_config.get_dbname() {
            config.dbname = Some(dbname.to_string());
        }
        if let Some(user) = tokio_config.get_user() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = tokio_config.get_password() {
            config.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(host) = tokio_config.get_hosts().first() {
            if let tokio_postgres::config::Host::Tcp(host_str) = host {
                config.host = Some(host_str.clone());
            }
        }
        if let Some(port) = tokio_config.get_ports().first() {
            config.port = Some(*port);
        }

        config.pool = Some(deadpool_postgres::PoolConfig {
            max_size: 10,
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        // Probe the connection before handing the pool out
        let client = pool
            .get()
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;
        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations from the `migrations/` directory.
    ///
    /// The schema uses `IF NOT EXISTS` throughout, so re-running on
    /// an already-migrated database is harmless.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        let migration_paths = [
            "migrations/001_initial_schema.sql",
            "../migrations/001_initial_schema.sql",
        ];

        let mut migration_sql = None;
        for path in &migration_paths {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    info!("Found migration file at: {}", path);
                    migration_sql = Some(content);
                    break;
                }
                Err(e) => debug!("Tried path '{}': {}", path, e),
            }
        }

        let migration_sql = migration_sql.ok_or_else(|| {
            DatabaseError::MigrationError(format!(
                "Could not find migration file. Tried paths: {:?}",
                migration_paths
            ))
        })?;

        match client.batch_execute(&migration_sql).await {
            Ok(_) => {
                info!("Migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                // 42P07 duplicate_table / 42710 duplicate_object: schema
                // already applied by an earlier run or another instance.
                let duplicate = e
                    .code()
                    .map(|c| c.code() == "42P07" || c.code() == "42710")
                    .unwrap_or(false);

                if duplicate {
                    warn!("Schema objects already exist, continuing");
                    Ok(())
                } else {
                    Err(DatabaseError::MigrationError(e.to_string()))
                }
            }
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// Re-export commonly used items
pub use models::*;
