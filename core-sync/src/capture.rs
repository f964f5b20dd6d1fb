//! # Change Capture
//!
//! Write-path hook that records business-table writes into the endpoint's
//! outbound queue. Application code calls [`ChangeCapture::on_write`] right
//! after each INSERT/UPDATE/DELETE it performs; there are no database
//! triggers, so a write that bypasses this hook is invisible to sync.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::error::{Result, SyncError};
use crate::queue::{ChangeOp, ChangeQueueEntry, ChangeQueueRepository, EntryId};

/// Payload key holding the row's own sync timestamp. When present, the queue
/// entry is stamped with it so arbitration compares row clocks, not capture
/// clocks.
pub const SYNC_TIMESTAMP_COLUMN: &str = "sync_timestamp";

/// Hook invoked by application code after every business-table write
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeCapture: Send + Sync {
    /// Record one write.
    ///
    /// `payload` must be a full row snapshot (a JSON object keyed by column
    /// name) for INSERT and UPDATE, and is ignored for DELETE.
    async fn on_write(
        &self,
        table: &str,
        row_id: i64,
        op: ChangeOp,
        payload: Option<Value>,
    ) -> Result<EntryId>;
}

/// Capture implementation that appends to an outbound change queue
pub struct QueueChangeCapture {
    queue: Arc<dyn ChangeQueueRepository>,
}

impl QueueChangeCapture {
    pub fn new(queue: Arc<dyn ChangeQueueRepository>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ChangeCapture for QueueChangeCapture {
    #[instrument(skip(self, payload), fields(table = %table, row_id = row_id, op = %op))]
    async fn on_write(
        &self,
        table: &str,
        row_id: i64,
        op: ChangeOp,
        payload: Option<Value>,
    ) -> Result<EntryId> {
        let mut entry = ChangeQueueEntry::new(table.to_string(), row_id, op, payload);

        if op.requires_payload() && entry.payload.is_none() {
            return Err(SyncError::MissingPayload {
                entry_id: entry.id.to_string(),
            });
        }

        // DELETE carries no snapshot
        if op == ChangeOp::Delete {
            entry.payload = None;
        }

        if let Some(ts) = entry
            .payload
            .as_ref()
            .and_then(|p| p.get(SYNC_TIMESTAMP_COLUMN))
            .and_then(Value::as_i64)
        {
            entry = entry.with_captured_at(ts);
        }

        self.queue.enqueue(&entry).await?;
        Ok(entry.id)
    }
}
