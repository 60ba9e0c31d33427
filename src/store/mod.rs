//! Snapshot persistence.
//!
//! # Data Flow
//! ```text
//! mutation committed
//!     → snapshot.rs (Snapshot built under the gateway read lock)
//!     → persister.rs (background writer, coalesces bursts)
//!     → KeyValueStore::set("{name}-{version}")
//!
//! startup
//!     → KeyValueStore::get("{name}-{version}") or "{name}-{previous}"
//!     → replay into the gateway
//! ```
//!
//! # Design Decisions
//! - The store is a port; memory and file adapters live here, others plug in via the trait
//! - Values are JSON strings so adapters never need to know the snapshot type

pub mod file;
pub mod memory;
pub mod persister;
pub mod snapshot;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use persister::{PersistStatus, Persister};
pub use snapshot::{backup_key, snapshot_key, Snapshot};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error for `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize `{key}`: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key-value store used for snapshots.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl` if given.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Value for `key`, or `default` if absent.
    async fn get_or(&self, key: &str, default: &str) -> Result<String, StoreError> {
        Ok(self
            .get(key)
            .await?
            .unwrap_or_else(|| default.to_string()))
    }
}
