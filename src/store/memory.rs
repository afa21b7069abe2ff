//! In-process backend with the same TTL semantics as the shared store.
//!
//! Every connection handed out by one [`MemoryManager`] (and its clones)
//! sees the same keyspace, so it stands in for a shared store within a
//! single process. Expiry follows the tokio clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bb8::ManageConnection;
use tokio::time::Instant;

use super::{StoreConnection, StoreError};

struct Slot {
    value: Vec<u8>,
    expires_at: Instant,
    touched: Instant,
}

#[derive(Default)]
struct Keyspace {
    slots: Mutex<HashMap<String, Slot>>,
    down: AtomicBool,
    latency_ms: AtomicU64,
    dials: AtomicUsize,
}

impl Keyspace {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies the simulated round-trip latency, then fails if the store is down.
    async fn round_trip(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.ensure_up()
    }

    fn ensure_up(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "memory store is down",
            )))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryManager {
    keyspace: Arc<Keyspace>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while down, dials, checks and commands fail.
    pub fn set_available(&self, available: bool) {
        self.keyspace.down.store(!available, Ordering::SeqCst);
    }

    /// Simulates a slow or hung server: every dial, check and command first
    /// waits `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.keyspace.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of connections dialed so far.
    pub fn dials(&self) -> usize {
        self.keyspace.dials.load(Ordering::SeqCst)
    }

    /// Number of unexpired keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.keyspace
            .slots()
            .values()
            .filter(|slot| slot.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of `key`, if it exists.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.keyspace
            .slots()
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.expires_at - now)
    }
}

#[async_trait]
impl ManageConnection for MemoryManager {
    type Connection = MemoryConnection;
    type Error = StoreError;

    async fn connect(&self) -> Result<MemoryConnection, StoreError> {
        self.keyspace.round_trip().await?;
        self.keyspace.dials.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            keyspace: Arc::clone(&self.keyspace),
        })
    }

    async fn is_valid(&self, _conn: &mut MemoryConnection) -> Result<(), StoreError> {
        self.keyspace.round_trip().await
    }

    fn has_broken(&self, _conn: &mut MemoryConnection) -> bool {
        self.keyspace.down.load(Ordering::SeqCst)
    }
}

pub struct MemoryConnection {
    keyspace: Arc<Keyspace>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.keyspace.round_trip().await?;
        let now = Instant::now();
        let mut slots = self.keyspace.slots();
        match slots.get_mut(key) {
            Some(slot) if slot.expires_at > now => {
                slot.touched = now;
                Ok(Some(slot.value.clone()))
            }
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_expiry(
        &mut self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        self.keyspace.round_trip().await?;
        let now = Instant::now();
        let slot = Slot {
            value: value.to_vec(),
            expires_at: now + Duration::from_secs(ttl_seconds),
            touched: now,
        };
        self.keyspace.slots().insert(key.to_owned(), slot);
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.keyspace.round_trip().await?;
        self.keyspace.slots().remove(key);
        Ok(())
    }

    async fn delete_idle(&mut self, prefix: &str, min_idle: Duration) -> Result<usize, StoreError> {
        self.keyspace.round_trip().await?;
        let now = Instant::now();
        let mut slots = self.keyspace.slots();
        let before = slots.len();
        slots.retain(|key, slot| {
            !key.starts_with(prefix) || (slot.expires_at > now && now - slot.touched < min_idle)
        });
        Ok(before - slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_their_ttl() {
        let manager = MemoryManager::new();
        let mut conn = manager.connect().await.unwrap();
        conn.set_with_expiry("k", b"v", 10).await.unwrap();
        assert_eq!(manager.ttl("k"), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(conn.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(conn.get("k").await.unwrap(), None);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let manager = MemoryManager::new();
        let mut conn = manager.connect().await.unwrap();
        conn.delete("missing").await.unwrap();
        conn.set_with_expiry("k", b"v", 10).await.unwrap();
        conn.delete("k").await.unwrap();
        conn.delete("k").await.unwrap();
        assert_eq!(conn.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_idle_respects_prefix_and_access() {
        let manager = MemoryManager::new();
        let mut conn = manager.connect().await.unwrap();
        conn.set_with_expiry("ns:old", b"1", 100).await.unwrap();
        conn.set_with_expiry("ns:hot", b"2", 100).await.unwrap();
        conn.set_with_expiry("other:old", b"3", 100).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        conn.get("ns:hot").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        let removed = conn.delete_idle("ns:", Duration::from_secs(45)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(conn.get("ns:old").await.unwrap().is_none());
        assert!(conn.get("ns:hot").await.unwrap().is_some());
        assert!(conn.get("other:old").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn outage_fails_commands() {
        let manager = MemoryManager::new();
        let mut conn = manager.connect().await.unwrap();
        manager.set_available(false);
        assert!(conn.get("k").await.is_err());
        assert!(manager.is_valid(&mut conn).await.is_err());
        assert!(manager.has_broken(&mut conn));
        assert!(manager.connect().await.is_err());
    }
}
