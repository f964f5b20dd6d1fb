//! # Event Bus System
//!
//! Provides an event-driven architecture for the reservation sync core using
//! `tokio::sync::broadcast`. This module enables decoupled communication
//! between the sync engine and its observers (monitoring, dashboards, ops
//! tooling) through typed events.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Started {
//!         reason: "page_load".to_string(),
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Sync(SyncEvent::Started { .. })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The bus is backed by `tokio::sync::broadcast`:
//! - `RecvError::Lagged(n)`: the subscriber missed `n` events; non-fatal.
//! - `RecvError::Closed`: all senders dropped; treat as shutdown.
//!
//! `emit` returns an error only when no subscriber exists, which callers may
//! safely ignore (`.ok()`), matching fire-and-forget semantics.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Synchronization lifecycle events
    Sync(SyncEvent),
}

/// Events emitted over the lifetime of one sync pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A sync pass was triggered
    Started {
        /// Free-text trigger label (e.g. "page_load", "cron")
        reason: String,
    },

    /// A sync pass finished; counts are totals across both directions
    Completed {
        reason: String,
        pulled: u64,
        applied: u64,
        skipped: u64,
        failed: u64,
    },

    /// A sync pass aborted before completing both directions
    Failed { reason: String, message: String },
}

/// Central broadcast channel for publishing core events.
///
/// Cloning an `EventBus` yields a handle to the same underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers the event reached. An `Err` means
    /// there were no subscribers; this is not a failure for fire-and-forget
    /// callers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
