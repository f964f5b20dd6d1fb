//! # Endpoint Connection Module
//!
//! Provides SQLite connection pooling for the two sync endpoints.
//!
//! ## Features
//!
//! - **WAL Mode**: Enabled for better concurrency (multiple readers, one writer)
//! - **Connection Pooling**: Configurable max connections with acquire timeout
//! - **Foreign Keys**: Enforced for referential integrity
//! - **Fail-Fast Ping**: `SELECT 1` health check at connection time, so an
//!   unreachable endpoint is detected before any queue is drained
//!
//! ## Testing
//!
//! For tests, use in-memory databases:
//!
//! ```rust,ignore
//! let pool = create_test_pool().await?;
//! ```

use crate::error::{Result, SyncError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Open a connection pool for one endpoint database.
///
/// The database file must already exist; sync never creates an endpoint.
/// The pool is pinged before being returned, so construction fails fast when
/// the endpoint is unreachable.
///
/// # Errors
///
/// Returns [`SyncError::Connectivity`] when the database cannot be opened or
/// does not answer the health-check query.
pub async fn connect(endpoint: &str, database_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(false)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .map_err(|e| SyncError::Connectivity {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    ping(endpoint, &pool).await?;

    debug!(endpoint, path = %database_path.display(), "Endpoint connected");
    Ok(pool)
}

/// Verify an endpoint still answers queries.
pub async fn ping(endpoint: &str, pool: &SqlitePool) -> Result<()> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(|e| SyncError::Connectivity {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

    Ok(())
}

/// Check whether a table exists in an endpoint database.
pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .map_err(|e| SyncError::Database(e.to_string()))?;

    Ok(count > 0)
}

/// Create an in-memory pool for tests.
///
/// Uses a single connection so the in-memory database is shared by every
/// query issued through the pool.
pub async fn create_test_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

    Ok(pool)
}
