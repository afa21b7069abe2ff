//! Shared, pooled storage for cache entries.
//!
//! [`CacheStore`] addresses entries by the SHA-256 digest of their URI under a
//! configurable namespace, writes each record together with its expiry as one
//! atomic unit, and fails soft: a store that cannot be reached turns reads
//! into misses and writes into no-ops.

pub mod backend;
pub mod memory;
pub mod pool;
pub mod redis;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bb8::ManageConnection;
use time::OffsetDateTime;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

pub use backend::{StoreConnection, StoreError};
pub use memory::MemoryManager;
pub use pool::{Pool, PoolConfig, PoolStatus, PooledConnection, RunError};
pub use self::redis::RedisManager;

use crate::cache::entry::CacheEntry;
use crate::cache::freshness::FreshnessEvaluator;
use crate::cache::{key, policy};
use crate::config::Settings;
use crate::http::{Method, Request, Response};

/// Budget for one store operation when the caller gives no deadline.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Entry persistence over a connection pool.
///
/// Every operation (checkout plus command) runs under a deadline. The plain
/// methods use `now + op_timeout`; the `*_until` variants take the caller's.
pub struct CacheStore<M: ManageConnection = RedisManager> {
    pool: Pool<M>,
    key_prefix: String,
    evaluator: FreshnessEvaluator,
    op_timeout: Duration,
    closed: AtomicBool,
}

impl CacheStore<RedisManager> {
    /// Builds a Redis-backed store from settings. Connections are dialed lazily.
    pub fn connect(settings: &Settings) -> Result<Self, StoreError> {
        let store = &settings.store;
        let manager = RedisManager::new(&store.address, store.password.clone(), store.wait_timeout)?;
        Ok(Self::new(
            store.pool_config().build(manager),
            store.key_prefix.clone(),
            FreshnessEvaluator::new(settings.server.cache_timeout),
        )
        .with_op_timeout(store.wait_timeout))
    }
}

impl<M> CacheStore<M>
where
    M: ManageConnection,
    M::Connection: StoreConnection,
    M::Error: Into<StoreError>,
{
    pub fn new(pool: Pool<M>, key_prefix: impl Into<String>, evaluator: FreshnessEvaluator) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
            evaluator,
            op_timeout: DEFAULT_OP_TIMEOUT,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.state()
    }

    pub fn evaluator(&self) -> &FreshnessEvaluator {
        &self.evaluator
    }

    /// The store key for `uri`: the namespace prefix followed by the digest.
    pub fn key(&self, uri: &str) -> String {
        format!("{}{}", self.key_prefix, key::derive(uri))
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.op_timeout
    }

    /// Runs `op` unless the store is closed, giving up at `deadline`.
    async fn bounded<T>(
        &self,
        deadline: Instant,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        timeout_at(deadline, op).await.map_err(|_| StoreError::Timeout)?
    }

    async fn checkout(&self) -> Result<PooledConnection<'_, M>, StoreError> {
        self.pool.get().await.map_err(|e| match e {
            RunError::User(e) => e.into(),
            RunError::TimedOut => StoreError::Timeout,
        })
    }

    /// Reads the entry for `uri`. Any failure is logged and reported as a miss.
    pub async fn get(&self, uri: &str) -> Option<CacheEntry> {
        self.get_until(uri, self.deadline()).await
    }

    pub async fn get_until(&self, uri: &str, deadline: Instant) -> Option<CacheEntry> {
        match self.try_get_until(uri, deadline).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(uri, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Reads the entry for `uri`, surfacing store errors.
    ///
    /// A record that fails to deserialize is deleted before the error is
    /// returned, so it is not read again.
    pub async fn try_get(&self, uri: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.try_get_until(uri, self.deadline()).await
    }

    pub async fn try_get_until(
        &self,
        uri: &str,
        deadline: Instant,
    ) -> Result<Option<CacheEntry>, StoreError> {
        self.bounded(deadline, self.read(uri)).await
    }

    async fn read(&self, uri: &str) -> Result<Option<CacheEntry>, StoreError> {
        let key = self.key(uri);
        let mut conn = self.checkout().await?;
        let Some(record) = conn.get(&key).await? else {
            debug!(uri, "cache miss");
            return Ok(None);
        };
        match CacheEntry::from_record(&record) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(uri, %key, error = %e, "deleting corrupt cache record");
                conn.delete(&key).await?;
                Err(e.into())
            }
        }
    }

    /// The store TTL for `entry`: its lifetime, or the default lifetime for
    /// an entry that is revalidated on every use anyway.
    fn ttl(&self, entry: &CacheEntry) -> u64 {
        if entry.max_age() == 0 && entry.must_revalidate() {
            self.evaluator.default_lifetime().as_secs()
        } else {
            entry.max_age()
        }
    }

    /// Stores `entry` under `uri` with a TTL of its `max_age`.
    ///
    /// Returns `Ok(false)` without touching the store for a zero lifetime,
    /// unless the entry must be revalidated before reuse: such an entry is
    /// kept for the default lifetime so its validators can be used.
    pub async fn put(&self, uri: &str, entry: &CacheEntry) -> Result<bool, StoreError> {
        self.put_until(uri, entry, self.deadline()).await
    }

    pub async fn put_until(
        &self,
        uri: &str,
        entry: &CacheEntry,
        deadline: Instant,
    ) -> Result<bool, StoreError> {
        let ttl = self.ttl(entry);
        if ttl == 0 {
            debug!(uri, "zero lifetime, not storing");
            return Ok(false);
        }

        let record = entry.to_record()?;
        let key = self.key(uri);
        self.bounded(deadline, async {
            let mut conn = self.checkout().await?;
            conn.set_with_expiry(&key, &record, ttl).await
        })
        .await?;
        debug!(uri, ttl, "stored cache entry");
        Ok(true)
    }

    /// Removes the entry for `uri`. Removing an absent entry succeeds.
    pub async fn delete(&self, uri: &str) -> Result<(), StoreError> {
        self.delete_until(uri, self.deadline()).await
    }

    pub async fn delete_until(&self, uri: &str, deadline: Instant) -> Result<(), StoreError> {
        let key = self.key(uri);
        self.bounded(deadline, async {
            let mut conn = self.checkout().await?;
            conn.delete(&key).await
        })
        .await
    }

    /// Builds the entry for an origin response if both sides allow storing it.
    ///
    /// Only `GET` responses are admitted; a `HEAD` response has no body to
    /// replay.
    pub fn admit(
        &self,
        uri: &str,
        request: &Request,
        response: &Response,
        now: OffsetDateTime,
    ) -> Option<CacheEntry> {
        if *request.method() != Method::Get || !policy::request_is_cacheable(request) {
            return None;
        }
        if !response.status().is_heuristically_cacheable() {
            return None;
        }
        let meta = self
            .evaluator
            .evaluate(response.headers(), now)
            .into_metadata()?;
        debug!(uri, source = ?meta.source, lifetime = meta.max_age, "response cacheable");
        Some(CacheEntry::new(uri, response, meta))
    }

    /// Stores `response` when the request and response are both eligible.
    ///
    /// Returns whether a record was written. Store failures are logged and
    /// reported as `false`.
    pub async fn check_and_store(
        &self,
        uri: &str,
        request: &Request,
        response: &Response,
        now: OffsetDateTime,
    ) -> bool {
        self.check_and_store_until(uri, request, response, now, self.deadline())
            .await
    }

    pub async fn check_and_store_until(
        &self,
        uri: &str,
        request: &Request,
        response: &Response,
        now: OffsetDateTime,
        deadline: Instant,
    ) -> bool {
        let Some(entry) = self.admit(uri, request, response, now) else {
            debug!(uri, status = response.status().as_u16(), "response not cacheable");
            return false;
        };
        match self.put_until(uri, &entry, deadline).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(uri, error = %e, "cache write failed");
                false
            }
        }
    }

    /// Removes entries in this store's namespace idle for at least `min_idle`.
    ///
    /// Not bounded by the operation timeout: a full keyspace scan can take
    /// longer. Checkout and each command still time out on their own.
    pub async fn clear(&self, min_idle: Duration) -> Result<usize, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let mut conn = self.checkout().await?;
        let removed = conn.delete_idle(&self.key_prefix, min_idle).await?;
        debug!(removed, ?min_idle, "cleared idle cache entries");
        Ok(removed)
    }

    /// Stops handing out connections. Later operations fail soft with
    /// [`StoreError::Closed`]; pooled connections are dropped with the store.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
