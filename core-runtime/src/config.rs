//! # Core Configuration Module
//!
//! Provides configuration management for the reservation sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that names the two database endpoints being kept in sync and the
//! queue tables each endpoint owns. It enforces fail-fast validation so that
//! a misconfigured deployment is rejected before any connection is opened.
//!
//! ## Usage
//!
//! ```
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .local_database_path("/var/lib/resync/local.db")
//!     .remote_database_path("/mnt/hut/remote.db")
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Core configuration for the reservation sync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Path to the local endpoint's SQLite database file
    pub local_database_path: PathBuf,

    /// Path to the remote endpoint's SQLite database file
    pub remote_database_path: PathBuf,

    /// Name of the outbound queue table in the local database
    pub local_queue_table: String,

    /// Name of the outbound queue table in the remote database
    pub remote_queue_table: String,

    /// Maximum number of pooled connections per endpoint
    pub max_connections: u32,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Both database paths are non-empty and distinct
    /// - Queue table names are non-empty and distinct
    /// - Pool sizing is sane
    pub fn validate(&self) -> Result<()> {
        if self.local_database_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "Local database path cannot be empty".to_string(),
            ));
        }

        if self.remote_database_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "Remote database path cannot be empty".to_string(),
            ));
        }

        if self.local_database_path == self.remote_database_path {
            return Err(Error::Config(
                "Local and remote endpoints must be distinct databases".to_string(),
            ));
        }

        if self.local_queue_table.is_empty() || self.remote_queue_table.is_empty() {
            return Err(Error::Config(
                "Queue table names cannot be empty".to_string(),
            ));
        }

        if self.local_queue_table == self.remote_queue_table {
            return Err(Error::Config(
                "Local and remote queue tables must have distinct names".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(Error::Config(
                "Connection pool size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    local_database_path: Option<PathBuf>,
    remote_database_path: Option<PathBuf>,
    local_queue_table: Option<String>,
    remote_queue_table: Option<String>,
    max_connections: Option<u32>,
}

impl CoreConfigBuilder {
    /// Sets the local endpoint's database path.
    pub fn local_database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.local_database_path = Some(path.into());
        self
    }

    /// Sets the remote endpoint's database path.
    pub fn remote_database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.remote_database_path = Some(path.into());
        self
    }

    /// Sets the name of the local endpoint's outbound queue table.
    ///
    /// Default: `sync_queue_local`
    pub fn local_queue_table(mut self, table: impl Into<String>) -> Self {
        self.local_queue_table = Some(table.into());
        self
    }

    /// Sets the name of the remote endpoint's outbound queue table.
    ///
    /// Default: `sync_queue_remote`
    pub fn remote_queue_table(mut self, table: impl Into<String>) -> Self {
        self.remote_queue_table = Some(table.into());
        self
    }

    /// Sets the maximum number of pooled connections per endpoint.
    ///
    /// Default: 5
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error with an actionable message if a required field is
    /// missing or validation fails.
    pub fn build(self) -> Result<CoreConfig> {
        let local_database_path = self.local_database_path.ok_or_else(|| {
            Error::Config(
                "Local database path is required. Use .local_database_path() to set it."
                    .to_string(),
            )
        })?;

        let remote_database_path = self.remote_database_path.ok_or_else(|| {
            Error::Config(
                "Remote database path is required. Use .remote_database_path() to set it."
                    .to_string(),
            )
        })?;

        let config = CoreConfig {
            local_database_path,
            remote_database_path,
            local_queue_table: self
                .local_queue_table
                .unwrap_or_else(|| "sync_queue_local".to_string()),
            remote_queue_table: self
                .remote_queue_table
                .unwrap_or_else(|| "sync_queue_remote".to_string()),
            max_connections: self.max_connections.unwrap_or(5),
        };

        config.validate()?;

        Ok(config)
    }
}
