//! # Reservation Sync Engine
//!
//! Bidirectional, queue-based synchronization between two SQLite endpoints
//! holding the same reservation schema. Each endpoint records its writes into
//! an outbound change queue via [`capture::ChangeCapture`]; a sync pass run by
//! [`manager::SyncManager`] drains both queues, arbitrating conflicts with
//! per-row last-writer-wins timestamps.
//!
//! ## Modules
//!
//! - [`queue`]: persisted change queues with status-gated claims
//! - [`capture`]: write-path hook feeding the queues
//! - [`resolver`]: pure timestamp arbitration
//! - [`apply`]: destination-side row store
//! - [`manager`]: bidirectional pass orchestration
//! - [`db`]: endpoint connection pooling

pub mod apply;
pub mod capture;
pub mod db;
pub mod error;
pub mod manager;
pub mod queue;
pub mod resolver;

pub use apply::{RowStore, SqliteRowStore};
pub use capture::{ChangeCapture, QueueChangeCapture};
pub use error::{Result, SyncError};
pub use manager::{DirectionReport, SyncConfig, SyncManager, SyncResult};
pub use queue::{
    ChangeOp, ChangeQueueEntry, ChangeQueueRepository, EntryId, EntryStatus,
    SqliteChangeQueueRepository,
};
pub use resolver::{resolve, Winner};
