/// Database layer for Postline
///
/// One SQLite pool backs the whole engine: API handlers, the leaser, the
/// watchdog and every publish worker. `connect` opens it, applies the
/// embedded migrations and probes connectivity before anything else runs.
pub mod models;

use crate::{
    config::SchedulingConfig,
    error::{SchedResult, SchedulerError},
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Where the scheduler database lives
pub enum Storage<'a> {
    File(&'a Path),
    /// In-memory database for tests
    Memory,
}

/// Pool tuning derived from the publishing engine's concurrency model
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DatabaseOptions {
    /// One connection per publish worker, plus headroom for the leaser,
    /// the watchdog and API handlers. A writer waits out at most one
    /// leaser tick on SQLite's lock before surfacing a busy error.
    pub fn for_scheduling(scheduling: &SchedulingConfig) -> Self {
        Self {
            max_connections: scheduling.worker_parallelism as u32 + 4,
            busy_timeout: Duration::from_secs(scheduling.tick_interval_secs.max(1)),
        }
    }
}

/// Open the database, run migrations and verify the pool serves queries
pub async fn connect(storage: Storage<'_>, options: DatabaseOptions) -> SchedResult<SqlitePool> {
    let pool = match storage {
        Storage::File(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SchedulerError::Internal(format!("Failed to create data dir: {}", e))
                })?;
            }
            SqlitePoolOptions::new()
                .max_connections(options.max_connections)
                .connect_with(
                    SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true)
                        // Readers must not block behind publish workers
                        .journal_mode(SqliteJournalMode::Wal)
                        .foreign_keys(true)
                        .busy_timeout(options.busy_timeout),
                )
                .await?
        }
        // The schema lives only as long as its connection, so the pool is
        // pinned to a single connection that never retires
        Storage::Memory => {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(
                    SqliteConnectOptions::new()
                        .in_memory(true)
                        .foreign_keys(true),
                )
                .await?
        }
    };

    // Migrations are embedded at compile time from ./migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| SchedulerError::Internal(format!("Migration failed: {}", e)))?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}
