//! # Change Queue Store
//!
//! Persisted append-only change logs, one per endpoint (`sync_queue_local`,
//! `sync_queue_remote`). Each row describes a pending change destined for the
//! opposite endpoint: affected table, row id, operation, a full row snapshot,
//! and the capture timestamp used for conflict arbitration.
//!
//! ## Features
//!
//! - **Audit Trail**: entries are never deleted by the engine; only their
//!   `status` moves (`pending -> applied`, `applied -> failed` when a claimed
//!   apply errors, `failed -> pending` on bounded re-queue)
//! - **Status-Gated Claims**: `mark_applied` is a single conditional UPDATE,
//!   so concurrent drains apply each entry at most once
//! - **Retry Budget**: failed entries carry a `retry_count` and can be
//!   re-queued until the budget is exhausted
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::queue::{ChangeOp, ChangeQueueEntry, SqliteChangeQueueRepository};
//!
//! # async fn example(pool: sqlx::SqlitePool) -> core_sync::Result<()> {
//! let queue = SqliteChangeQueueRepository::new(pool, "sync_queue_local")?;
//! queue.initialize().await?;
//!
//! let entry = ChangeQueueEntry::new(
//!     "av_res".to_string(),
//!     99991,
//!     ChangeOp::Insert,
//!     Some(serde_json::json!({ "id": 99991, "bem": "Test Reservation" })),
//! );
//! queue.enqueue(&entry).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::apply::quote_ident;
use crate::error::{Result, SyncError};

/// Type-safe queue entry identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new random entry ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an entry ID from a string
    pub fn from_string(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SyncError::InvalidEntryId(e.to_string()))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row-level change operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// New row captured at the source
    Insert,
    /// Existing row mutated at the source
    Update,
    /// Row removed at the source
    Delete,
}

impl ChangeOp {
    /// Convert operation to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Whether this operation carries a row snapshot payload
    pub fn requires_payload(&self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

impl std::str::FromStr for ChangeOp {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(SyncError::InvalidOperation(s.to_string())),
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Entry is waiting to be propagated
    Pending,
    /// Entry was reconciled at the destination (applied or intentionally
    /// overridden by a newer destination row)
    Applied,
    /// Entry could not be applied; eligible for bounded re-queue
    Failed,
}

impl EntryStatus {
    /// Convert status to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }

    /// Check if status is terminal for the current drain
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

/// One recorded change destined for the opposite endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeQueueEntry {
    /// Unique identifier, assigned by the owning endpoint
    pub id: EntryId,
    /// Name of the affected business table
    pub table_name: String,
    /// Primary key of the affected row
    pub row_id: i64,
    /// Change operation
    pub operation: ChangeOp,
    /// Full row snapshot (INSERT/UPDATE) as a column -> value map; `None`
    /// for DELETE
    pub payload: Option<Value>,
    /// Unix timestamp when the change was captured at the source; doubles as
    /// the source row's sync timestamp for conflict comparison
    pub captured_at: i64,
    /// Current status
    pub status: EntryStatus,
    /// Number of apply attempts that failed
    pub retry_count: u32,
    /// Error detail from the most recent failed attempt
    pub error_message: Option<String>,
}

impl ChangeQueueEntry {
    /// Create a new pending entry captured now
    pub fn new(table_name: String, row_id: i64, operation: ChangeOp, payload: Option<Value>) -> Self {
        Self {
            id: EntryId::new(),
            table_name,
            row_id,
            operation,
            payload,
            captured_at: chrono::Utc::now().timestamp(),
            status: EntryStatus::Pending,
            retry_count: 0,
            error_message: None,
        }
    }

    /// Override the capture timestamp (used when the snapshot carries the
    /// row's own sync timestamp)
    pub fn with_captured_at(mut self, captured_at: i64) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Check if the entry can still be re-queued under the given budget
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }
}

/// Repository trait for one endpoint's outbound change queue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeQueueRepository: Send + Sync {
    /// Append a new entry; called by change capture, never by the drain
    async fn enqueue(&self, entry: &ChangeQueueEntry) -> Result<()>;

    /// All `pending` entries ordered by `captured_at` ascending, oldest first
    async fn drain_pending(&self, limit: u32) -> Result<Vec<ChangeQueueEntry>>;

    /// Claim an entry: `pending -> applied` as one conditional update.
    ///
    /// Returns `false` when the entry was not `pending` anymore, meaning a
    /// concurrent drain already claimed it.
    async fn mark_applied(&self, id: EntryId) -> Result<bool>;

    /// Record a failed apply on a claimed entry: `applied -> failed`,
    /// incrementing the retry counter.
    async fn mark_failed(&self, id: EntryId, error_detail: &str) -> Result<bool>;

    /// Re-queue failed entries whose retry budget is not exhausted.
    /// Returns the number of entries flipped back to `pending`.
    async fn requeue_failed(&self, max_retries: u32) -> Result<u64>;

    /// Find an entry by ID
    async fn find_by_id(&self, id: EntryId) -> Result<Option<ChangeQueueEntry>>;

    /// Count entries by status
    async fn count_by_status(&self, status: EntryStatus) -> Result<u64>;

    /// Whether the backing queue table exists and is reachable
    async fn table_exists(&self) -> Result<bool>;
}

/// SQLite implementation of the change queue, parameterized by table name so
/// the same code serves `sync_queue_local` and `sync_queue_remote`.
pub struct SqliteChangeQueueRepository {
    pool: SqlitePool,
    table: String,
    quoted: String,
}

impl SqliteChangeQueueRepository {
    /// Create a repository over the given queue table.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidIdentifier`] if the table name is not a
    /// valid SQL identifier.
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        let quoted = quote_ident(&table)?;
        Ok(Self { pool, table, quoted })
    }

    /// Initialize the queue table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                row_id INTEGER NOT NULL,
                operation TEXT NOT NULL,
                payload TEXT,
                captured_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                CONSTRAINT queue_status_check CHECK (
                    status IN ('pending', 'applied', 'failed')
                ),
                CONSTRAINT queue_operation_check CHECK (
                    operation IN ('INSERT', 'UPDATE', 'DELETE')
                )
            )
            "#,
            self.quoted
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_status_captured ON {} (status, captured_at ASC)",
            self.table.replace('-', "_"),
            self.quoted
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(())
    }

    fn entry_from_row(row: &SqliteRow) -> Result<ChangeQueueEntry> {
        let payload: Option<String> = row.get("payload");
        let payload = payload
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| SyncError::Database(format!("Corrupt payload JSON: {}", e)))?;

        Ok(ChangeQueueEntry {
            id: EntryId::from_string(&row.get::<String, _>("id"))?,
            table_name: row.get("table_name"),
            row_id: row.get("row_id"),
            operation: row.get::<String, _>("operation").parse()?,
            payload,
            captured_at: row.get("captured_at"),
            status: row.get::<String, _>("status").parse()?,
            retry_count: row.get::<i64, _>("retry_count") as u32,
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl ChangeQueueRepository for SqliteChangeQueueRepository {
    async fn enqueue(&self, entry: &ChangeQueueEntry) -> Result<()> {
        let payload_text = entry
            .payload
            .as_ref()
            .map(|p| serde_json::to_string(p))
            .transpose()
            .map_err(|e| SyncError::Database(format!("Unserializable payload: {}", e)))?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                id, table_name, row_id, operation, payload,
                captured_at, status, retry_count, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.quoted
        ))
        .bind(entry.id.to_string())
        .bind(&entry.table_name)
        .bind(entry.row_id)
        .bind(entry.operation.as_str())
        .bind(payload_text)
        .bind(entry.captured_at)
        .bind(entry.status.as_str())
        .bind(entry.retry_count as i64)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        debug!(
            entry_id = %entry.id,
            queue = %self.table,
            table = %entry.table_name,
            row_id = entry.row_id,
            operation = %entry.operation,
            "Enqueued change"
        );

        Ok(())
    }

    async fn drain_pending(&self, limit: u32) -> Result<Vec<ChangeQueueEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, table_name, row_id, operation, payload,
                   captured_at, status, retry_count, error_message
            FROM {}
            WHERE status = 'pending'
            ORDER BY captured_at ASC, id ASC
            LIMIT ?
            "#,
            self.quoted
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn mark_applied(&self, id: EntryId) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = 'applied' WHERE id = ? AND status = 'pending'",
            self.quoted
        ))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: EntryId, error_detail: &str) -> Result<bool> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET
                status = 'failed',
                retry_count = retry_count + 1,
                error_message = ?
            WHERE id = ? AND status = 'applied'
            "#,
            self.quoted
        ))
        .bind(error_detail)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn requeue_failed(&self, max_retries: u32) -> Result<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = 'pending' WHERE status = 'failed' AND retry_count < ?",
            self.quoted
        ))
        .bind(max_retries as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            info!(queue = %self.table, requeued, "Re-queued failed entries for retry");
        }

        Ok(requeued)
    }

    async fn find_by_id(&self, id: EntryId) -> Result<Option<ChangeQueueEntry>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT id, table_name, row_id, operation, payload,
                   captured_at, status, retry_count, error_message
            FROM {}
            WHERE id = ?
            "#,
            self.quoted
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn count_by_status(&self, status: EntryStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE status = ?",
            self.quoted
        ))
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| SyncError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    async fn table_exists(&self) -> Result<bool> {
        crate::db::table_exists(&self.pool, &self.table).await
    }
}
