//! Connection pool settings for the shared store, on top of `bb8`.
//!
//! - At most `capacity` connections exist at once; callers beyond that wait
//!   for a release, bounded by `wait_timeout`.
//! - Idle connections unused for `idle_timeout` are reaped, down to
//!   `max_idle`.
//! - Every connection is checked before it is handed out. A failed check
//!   evicts that connection and the pool moves on to the next one or dials.

use std::time::Duration;

use bb8::ManageConnection;

pub use bb8::{Pool, PooledConnection, RunError, State as PoolStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub capacity: usize,
    /// Idle connections kept once the idle reaper has run.
    pub max_idle: usize,
    pub idle_timeout: Duration,
    /// Bound on how long a checkout waits, dial and check included.
    pub wait_timeout: Duration,
}

impl PoolConfig {
    /// Builds a pool that dials lazily; nothing is connected until first use.
    pub fn build<M: ManageConnection>(&self, manager: M) -> Pool<M> {
        Pool::builder()
            .max_size(clamp(self.capacity.max(1)))
            .min_idle(Some(clamp(self.max_idle.min(self.capacity))))
            .idle_timeout(Some(self.idle_timeout))
            .connection_timeout(self.wait_timeout)
            .test_on_check_out(true)
            .retry_connection(false)
            .build_unchecked(manager)
    }
}

fn clamp(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryManager, StoreError};

    fn config(capacity: usize, max_idle: usize) -> PoolConfig {
        PoolConfig {
            capacity,
            max_idle,
            idle_timeout: Duration::from_secs(60),
            wait_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn checkout_reuses_released_connection() {
        let manager = MemoryManager::new();
        let pool = config(2, 1).build(manager.clone());
        drop(pool.get().await.unwrap());
        drop(pool.get().await.unwrap());
        assert!(pool.state().connections <= 2);
        assert!(manager.dials() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_times_out() {
        let pool = config(1, 0).build(MemoryManager::new());
        let held = pool.get().await.unwrap();

        let started = tokio::time::Instant::now();
        let err = pool.get().await.err().unwrap();
        assert!(matches!(err, RunError::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(1));

        drop(held);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_dial_is_bounded_by_wait_timeout() {
        let manager = MemoryManager::new();
        manager.set_latency(Duration::from_secs(120));
        let pool = config(1, 0).build(manager);

        let started = tokio::time::Instant::now();
        assert!(matches!(pool.get().await, Err(RunError::TimedOut)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn failed_check_evicts_and_dial_failure_surfaces() {
        let manager = MemoryManager::new();
        let pool = config(1, 1).build(manager.clone());
        drop(pool.get().await.unwrap());

        manager.set_available(false);
        assert!(matches!(pool.get().await, Err(RunError::User(StoreError::Io(_)) | RunError::TimedOut)));

        manager.set_available(true);
        assert!(pool.get().await.is_ok());
    }
}
