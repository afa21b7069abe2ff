//! The command set a store backend must provide.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store operation timed out")]
    Timeout,

    #[error("store is closed")]
    Closed,

    #[error("corrupt cache record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// One live connection to a store backend.
#[async_trait]
pub trait StoreConnection: Send {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes `value` and sets its expiry as one atomic unit.
    async fn set_with_expiry(
        &mut self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<(), StoreError>;

    /// Removes `key`; removing a missing key is not an error.
    async fn delete(&mut self, key: &str) -> Result<(), StoreError>;

    /// Removes keys under `prefix` not accessed for at least `min_idle`.
    /// Returns how many were removed.
    async fn delete_idle(&mut self, prefix: &str, min_idle: Duration) -> Result<usize, StoreError>;
}
