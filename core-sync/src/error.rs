use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Endpoint '{endpoint}' unreachable: {message}")]
    Connectivity { endpoint: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to apply queue entry {entry_id}: {message}")]
    Apply { entry_id: String, message: String },

    #[error("Queue entry {entry_id} not found")]
    EntryNotFound { entry_id: String },

    #[error("Queue entry {entry_id} has no payload for its operation")]
    MissingPayload { entry_id: String },

    #[error("Invalid queue entry ID: {0}")]
    InvalidEntryId(String),

    #[error("Invalid entry status: {0}")]
    InvalidStatus(String),

    #[error("Invalid change operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
