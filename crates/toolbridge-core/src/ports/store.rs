//! Configuration store port.
//!
//! The bridge reads server configurations owned by an external persistence
//! layer. Implementations handle all storage details; nothing in this
//! subsystem ever mutates a persisted configuration.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ServerConfiguration;

/// Errors surfaced by configuration lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested configuration does not exist. Requesting an unknown
    /// id is a caller programming error.
    #[error("server configuration not found: {0}")]
    NotFound(String),

    /// Storage backend error (database, etc.).
    #[error("storage error: {0}")]
    Internal(String),
}

/// Read-only access to persisted server configurations.
#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Fetch a configuration by id.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no configuration has this id
    /// - `Internal` on storage failure
    async fn get(&self, id: i64) -> Result<ServerConfiguration, StoreError>;
}
