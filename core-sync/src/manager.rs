//! # Sync Manager
//!
//! Orchestrates one bidirectional sync pass between the local and remote
//! endpoints. Each pass drains the remote queue into local tables, then the
//! local queue into remote tables; every entry is claimed before it is
//! applied, snapshot writes go through timestamp arbitration (deletes do
//! not), and one entry's failure never aborts the rest.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::{CoreConfig, EventBus};
//! use core_sync::manager::{SyncConfig, SyncManager};
//!
//! # async fn example() -> core_sync::Result<()> {
//! let config = CoreConfig::builder()
//!     .local_database_path("local.db")
//!     .remote_database_path("remote.db")
//!     .build()
//!     .map_err(|e| core_sync::SyncError::Database(e.to_string()))?;
//!
//! let manager =
//!     SyncManager::connect(&config, SyncConfig::default(), EventBus::default()).await?;
//! let result = manager.sync_on_page_load("page_load").await?;
//! println!("applied {} changes", result.total_applied());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::apply::{RowStore, SqliteRowStore};
use crate::db;
use crate::error::{Result, SyncError};
use crate::queue::{
    ChangeOp, ChangeQueueEntry, ChangeQueueRepository, SqliteChangeQueueRepository,
};
use crate::resolver;

/// Tuning knobs for one sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum entries drained from each queue per pass
    pub max_entries_per_drain: u32,
    /// Wall-clock budget for the whole pass; entries not reached stay pending
    pub drain_budget: Duration,
    /// Whether failed entries with remaining budget are re-queued each pass
    pub retry_failed: bool,
    /// Apply attempts per entry before it stays failed
    pub max_retries: u32,
    /// Primary key column shared by all synced business tables
    pub pk_column: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_entries_per_drain: 500,
            drain_budget: Duration::from_secs(30),
            retry_failed: true,
            max_retries: 3,
            pk_column: "id".to_string(),
        }
    }
}

/// Counters for one propagation direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionReport {
    /// Entries drained from the source queue
    pub pulled: u64,
    /// Entries whose payload reached the destination
    pub applied: u64,
    /// Entries reconciled without a write (lost claim, or destination newer)
    pub skipped: u64,
    /// Entries that errored during apply
    pub failed: u64,
}

/// Outcome of one bidirectional pass.
///
/// Each direction's `skipped` counter merges the two cases that reconcile an
/// entry without writing: the claim was lost to a concurrent pass, or the
/// destination row was newer and intentionally kept. Callers that need to
/// tell them apart can subscribe to the per-entry tracing output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    /// Trigger label passed to [`SyncManager::sync_on_page_load`]
    pub reason: String,
    pub remote_to_local: DirectionReport,
    pub local_to_remote: DirectionReport,
    /// Wall-clock duration of the pass
    pub duration: Duration,
}

impl SyncResult {
    pub fn total_pulled(&self) -> u64 {
        self.remote_to_local.pulled + self.local_to_remote.pulled
    }

    pub fn total_applied(&self) -> u64 {
        self.remote_to_local.applied + self.local_to_remote.applied
    }

    pub fn total_skipped(&self) -> u64 {
        self.remote_to_local.skipped + self.local_to_remote.skipped
    }

    pub fn total_failed(&self) -> u64 {
        self.remote_to_local.failed + self.local_to_remote.failed
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed() > 0
    }
}

enum EntryOutcome {
    Applied,
    Skipped,
}

/// Bidirectional synchronization engine over two endpoints
pub struct SyncManager {
    local_queue: Arc<dyn ChangeQueueRepository>,
    remote_queue: Arc<dyn ChangeQueueRepository>,
    local_rows: Arc<dyn RowStore>,
    remote_rows: Arc<dyn RowStore>,
    config: SyncConfig,
    event_bus: EventBus,
}

impl SyncManager {
    /// Connect to both endpoints and build the engine.
    ///
    /// Fails fast: an unreachable endpoint surfaces here as
    /// [`SyncError::Connectivity`], never mid-pass. Queue tables are created
    /// on each endpoint if absent.
    pub async fn connect(
        core_config: &CoreConfig,
        config: SyncConfig,
        event_bus: EventBus,
    ) -> Result<Self> {
        let local_pool = db::connect(
            "local",
            &core_config.local_database_path,
            core_config.max_connections,
        )
        .await?;
        let remote_pool = db::connect(
            "remote",
            &core_config.remote_database_path,
            core_config.max_connections,
        )
        .await?;

        let local_queue =
            SqliteChangeQueueRepository::new(local_pool.clone(), &core_config.local_queue_table)?;
        let remote_queue = SqliteChangeQueueRepository::new(
            remote_pool.clone(),
            &core_config.remote_queue_table,
        )?;
        local_queue.initialize().await?;
        remote_queue.initialize().await?;

        info!(
            local = %core_config.local_database_path.display(),
            remote = %core_config.remote_database_path.display(),
            "Sync manager connected to both endpoints"
        );

        Ok(Self {
            local_queue: Arc::new(local_queue),
            remote_queue: Arc::new(remote_queue),
            local_rows: Arc::new(SqliteRowStore::new(local_pool)),
            remote_rows: Arc::new(SqliteRowStore::new(remote_pool)),
            config,
            event_bus,
        })
    }

    /// Build the engine over pre-constructed stores. Used by tests and by
    /// callers that manage their own pools.
    pub fn with_endpoints(
        local_queue: Arc<dyn ChangeQueueRepository>,
        remote_queue: Arc<dyn ChangeQueueRepository>,
        local_rows: Arc<dyn RowStore>,
        remote_rows: Arc<dyn RowStore>,
        config: SyncConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            local_queue,
            remote_queue,
            local_rows,
            remote_rows,
            config,
            event_bus,
        }
    }

    /// Whether both endpoints have their queue table in place.
    pub async fn check_queue_tables(&self) -> Result<bool> {
        Ok(self.local_queue.table_exists().await? && self.remote_queue.table_exists().await?)
    }

    /// Run one bidirectional sync pass.
    ///
    /// Remote changes are pulled into local tables first, then local changes
    /// are pushed to the remote. When either queue table is missing the pass
    /// is a no-op with all counters zero.
    #[instrument(skip(self), fields(reason = %reason))]
    pub async fn sync_on_page_load(&self, reason: &str) -> Result<SyncResult> {
        let started = Instant::now();
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                reason: reason.to_string(),
            }))
            .ok();

        if !self.check_queue_tables().await? {
            warn!("Queue tables missing on at least one endpoint, skipping pass");
            return Ok(self.finish(reason, started, DirectionReport::default(), DirectionReport::default()));
        }

        let deadline = started + self.config.drain_budget;

        let remote_to_local = match self
            .sync_direction(&self.remote_queue, &self.local_rows, "remote_to_local", deadline)
            .await
        {
            Ok(report) => report,
            Err(e) => return Err(self.abort(reason, e)),
        };

        let local_to_remote = match self
            .sync_direction(&self.local_queue, &self.remote_rows, "local_to_remote", deadline)
            .await
        {
            Ok(report) => report,
            Err(e) => return Err(self.abort(reason, e)),
        };

        Ok(self.finish(reason, started, remote_to_local, local_to_remote))
    }

    fn finish(
        &self,
        reason: &str,
        started: Instant,
        remote_to_local: DirectionReport,
        local_to_remote: DirectionReport,
    ) -> SyncResult {
        let result = SyncResult {
            reason: reason.to_string(),
            remote_to_local,
            local_to_remote,
            duration: started.elapsed(),
        };

        info!(
            reason,
            pulled = result.total_pulled(),
            applied = result.total_applied(),
            skipped = result.total_skipped(),
            failed = result.total_failed(),
            duration_ms = result.duration.as_millis() as u64,
            "Sync pass completed"
        );

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                reason: result.reason.clone(),
                pulled: result.total_pulled(),
                applied: result.total_applied(),
                skipped: result.total_skipped(),
                failed: result.total_failed(),
            }))
            .ok();

        result
    }

    fn abort(&self, reason: &str, error: SyncError) -> SyncError {
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Failed {
                reason: reason.to_string(),
                message: error.to_string(),
            }))
            .ok();
        error
    }

    /// Drain one queue into the opposite endpoint's tables.
    async fn sync_direction(
        &self,
        source_queue: &Arc<dyn ChangeQueueRepository>,
        destination_rows: &Arc<dyn RowStore>,
        direction: &str,
        deadline: Instant,
    ) -> Result<DirectionReport> {
        if self.config.retry_failed {
            source_queue.requeue_failed(self.config.max_retries).await?;
        }

        let entries = source_queue
            .drain_pending(self.config.max_entries_per_drain)
            .await?;

        let mut report = DirectionReport {
            pulled: entries.len() as u64,
            ..DirectionReport::default()
        };

        for entry in entries {
            if Instant::now() >= deadline {
                warn!(
                    direction,
                    remaining = report.pulled - report.applied - report.skipped - report.failed,
                    "Drain budget exhausted, leaving remaining entries pending"
                );
                break;
            }

            match self
                .process_entry(source_queue, destination_rows, &entry)
                .await
            {
                Ok(EntryOutcome::Applied) => report.applied += 1,
                Ok(EntryOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        direction,
                        entry_id = %entry.id,
                        table = %entry.table_name,
                        row_id = entry.row_id,
                        error = %e,
                        "Queue entry failed, continuing with the rest"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Claim, arbitrate, and apply a single entry.
    ///
    /// The claim is a conditional status update, so when two passes race over
    /// the same entry exactly one proceeds past this point. After a won claim
    /// any error flips the entry to `failed` for a later retry.
    async fn process_entry(
        &self,
        source_queue: &Arc<dyn ChangeQueueRepository>,
        destination_rows: &Arc<dyn RowStore>,
        entry: &ChangeQueueEntry,
    ) -> Result<EntryOutcome> {
        if !source_queue.mark_applied(entry.id).await? {
            return Ok(EntryOutcome::Skipped);
        }

        match self.apply_entry(destination_rows, entry).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                source_queue.mark_failed(entry.id, &e.to_string()).await?;
                Err(SyncError::Apply {
                    entry_id: entry.id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn apply_entry(
        &self,
        destination_rows: &Arc<dyn RowStore>,
        entry: &ChangeQueueEntry,
    ) -> Result<EntryOutcome> {
        match entry.operation {
            ChangeOp::Insert | ChangeOp::Update => {
                let destination_ts = destination_rows
                    .sync_timestamp(&entry.table_name, &self.config.pk_column, entry.row_id)
                    .await?;

                let winner = resolver::resolve(Some(entry.captured_at), destination_ts);
                if !winner.source_wins() {
                    info!(
                        entry_id = %entry.id,
                        table = %entry.table_name,
                        row_id = entry.row_id,
                        source_ts = entry.captured_at,
                        destination_ts,
                        "Destination row is newer, skipping change"
                    );
                    return Ok(EntryOutcome::Skipped);
                }

                let payload = entry.payload.as_ref().ok_or_else(|| {
                    SyncError::MissingPayload {
                        entry_id: entry.id.to_string(),
                    }
                })?;
                destination_rows
                    .upsert(
                        &entry.table_name,
                        &self.config.pk_column,
                        entry.row_id,
                        payload,
                    )
                    .await?;
            }
            // Deletes are unconditional: removal by primary key, no
            // arbitration against the destination row
            ChangeOp::Delete => {
                destination_rows
                    .delete(&entry.table_name, &self.config.pk_column, entry.row_id)
                    .await?;
            }
        }

        Ok(EntryOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::MockRowStore;
    use crate::queue::MockChangeQueueRepository;
    use serde_json::json;

    fn pending_entry(row_id: i64, captured_at: i64) -> ChangeQueueEntry {
        ChangeQueueEntry::new(
            "av_res".to_string(),
            row_id,
            ChangeOp::Update,
            Some(json!({ "id": row_id, "bem": "x", "sync_timestamp": captured_at })),
        )
        .with_captured_at(captured_at)
    }

    fn idle_queue() -> MockChangeQueueRepository {
        let mut queue = MockChangeQueueRepository::new();
        queue.expect_table_exists().returning(|| Ok(true));
        queue.expect_requeue_failed().returning(|_| Ok(0));
        queue.expect_drain_pending().returning(|_| Ok(vec![]));
        queue
    }

    fn manager_with(
        remote_queue: MockChangeQueueRepository,
        local_rows: MockRowStore,
    ) -> SyncManager {
        SyncManager::with_endpoints(
            Arc::new(idle_queue()),
            Arc::new(remote_queue),
            Arc::new(local_rows),
            Arc::new(MockRowStore::new()),
            SyncConfig::default(),
            EventBus::default(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_entries_per_drain, 500);
        assert_eq!(config.drain_budget, Duration::from_secs(30));
        assert!(config.retry_failed);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.pk_column, "id");
    }

    #[test]
    fn test_result_totals() {
        let result = SyncResult {
            reason: "test".to_string(),
            remote_to_local: DirectionReport {
                pulled: 3,
                applied: 2,
                skipped: 0,
                failed: 1,
            },
            local_to_remote: DirectionReport {
                pulled: 2,
                applied: 2,
                skipped: 0,
                failed: 0,
            },
            duration: Duration::from_millis(5),
        };

        assert_eq!(result.total_pulled(), 5);
        assert_eq!(result.total_applied(), 4);
        assert_eq!(result.total_failed(), 1);
        assert!(result.has_failures());
    }

    #[tokio::test]
    async fn test_missing_queue_table_is_a_noop() {
        let mut local_queue = MockChangeQueueRepository::new();
        local_queue.expect_table_exists().returning(|| Ok(false));

        let manager = SyncManager::with_endpoints(
            Arc::new(local_queue),
            Arc::new(MockChangeQueueRepository::new()),
            Arc::new(MockRowStore::new()),
            Arc::new(MockRowStore::new()),
            SyncConfig::default(),
            EventBus::default(),
        );

        let result = manager.sync_on_page_load("page_load").await.unwrap();
        assert_eq!(result.total_pulled(), 0);
        assert_eq!(result.total_applied(), 0);
    }

    #[tokio::test]
    async fn test_lost_claim_counts_as_skip() {
        let entry = pending_entry(1, 100);

        let mut remote_queue = MockChangeQueueRepository::new();
        remote_queue.expect_table_exists().returning(|| Ok(true));
        remote_queue.expect_requeue_failed().returning(|_| Ok(0));
        let drained = entry.clone();
        remote_queue
            .expect_drain_pending()
            .returning(move |_| Ok(vec![drained.clone()]));
        // Another pass already claimed this entry
        remote_queue.expect_mark_applied().returning(|_| Ok(false));

        let manager = manager_with(remote_queue, MockRowStore::new());
        let result = manager.sync_on_page_load("page_load").await.unwrap();

        assert_eq!(result.remote_to_local.pulled, 1);
        assert_eq!(result.remote_to_local.skipped, 1);
        assert_eq!(result.remote_to_local.applied, 0);
    }

    #[tokio::test]
    async fn test_newer_destination_skips_without_write() {
        let entry = pending_entry(1, 100);

        let mut remote_queue = MockChangeQueueRepository::new();
        remote_queue.expect_table_exists().returning(|| Ok(true));
        remote_queue.expect_requeue_failed().returning(|_| Ok(0));
        let drained = entry.clone();
        remote_queue
            .expect_drain_pending()
            .returning(move |_| Ok(vec![drained.clone()]));
        remote_queue.expect_mark_applied().returning(|_| Ok(true));

        let mut local_rows = MockRowStore::new();
        local_rows
            .expect_sync_timestamp()
            .returning(|_, _, _| Ok(Some(999)));
        // No upsert expectation: a write would panic the mock

        let manager = manager_with(remote_queue, local_rows);
        let result = manager.sync_on_page_load("page_load").await.unwrap();

        assert_eq!(result.remote_to_local.skipped, 1);
        assert_eq!(result.remote_to_local.applied, 0);
        assert_eq!(result.remote_to_local.failed, 0);
    }

    #[tokio::test]
    async fn test_delete_entries_bypass_arbitration() {
        let entry = ChangeQueueEntry::new("av_res".to_string(), 1, ChangeOp::Delete, None)
            .with_captured_at(100);

        let mut remote_queue = MockChangeQueueRepository::new();
        remote_queue.expect_table_exists().returning(|| Ok(true));
        remote_queue.expect_requeue_failed().returning(|_| Ok(0));
        let drained = entry.clone();
        remote_queue
            .expect_drain_pending()
            .returning(move |_| Ok(vec![drained.clone()]));
        remote_queue.expect_mark_applied().returning(|_| Ok(true));

        let mut local_rows = MockRowStore::new();
        // No sync_timestamp expectation: a timestamp probe would panic the mock
        local_rows
            .expect_delete()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let manager = manager_with(remote_queue, local_rows);
        let result = manager.sync_on_page_load("page_load").await.unwrap();

        assert_eq!(result.remote_to_local.applied, 1);
        assert_eq!(result.remote_to_local.skipped, 0);
    }

    #[tokio::test]
    async fn test_apply_failure_marks_entry_failed_and_continues() {
        let bad = pending_entry(1, 100);
        let good = pending_entry(2, 100);
        let bad_id = bad.id;

        let mut remote_queue = MockChangeQueueRepository::new();
        remote_queue.expect_table_exists().returning(|| Ok(true));
        remote_queue.expect_requeue_failed().returning(|_| Ok(0));
        let drained = vec![bad.clone(), good.clone()];
        remote_queue
            .expect_drain_pending()
            .returning(move |_| Ok(drained.clone()));
        remote_queue.expect_mark_applied().returning(|_| Ok(true));
        remote_queue
            .expect_mark_failed()
            .withf(move |id, _| *id == bad_id)
            .times(1)
            .returning(|_, _| Ok(true));

        let mut local_rows = MockRowStore::new();
        local_rows
            .expect_sync_timestamp()
            .returning(|_, _, _| Ok(None));
        local_rows
            .expect_upsert()
            .returning(move |_, _, row_id, _| {
                if row_id == 1 {
                    Err(SyncError::Database("constraint violation".to_string()))
                } else {
                    Ok(())
                }
            });

        let manager = manager_with(remote_queue, local_rows);
        let result = manager.sync_on_page_load("page_load").await.unwrap();

        assert_eq!(result.remote_to_local.pulled, 2);
        assert_eq!(result.remote_to_local.failed, 1);
        assert_eq!(result.remote_to_local.applied, 1);
    }
}
