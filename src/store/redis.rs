//! Redis backend.
//!
//! Connections are multiplexed and dialed through `bb8-redis`. Both the dial
//! and every command reply are bounded by the store's I/O timeout, so a
//! server that accepts the socket and then stalls cannot hold a caller.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bb8::ManageConnection;
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use redis::{IntoConnectionInfo, RedisError};

use super::{StoreConnection, StoreError};

const SCAN_BATCH: usize = 256;

/// Dials authenticated Redis connections for the pool and checks them with
/// `PING` before they are handed out.
pub struct RedisManager {
    inner: RedisConnectionManager,
    io_timeout: Duration,
}

impl RedisManager {
    /// `address` is either `host:port` or a full `redis://` / `rediss://` URL.
    /// A `password` replaces any password embedded in the URL.
    pub fn new(address: &str, password: Option<String>, io_timeout: Duration) -> Result<Self, StoreError> {
        let url = if address.contains("://") {
            address.to_owned()
        } else {
            format!("redis://{address}/")
        };
        let mut info = url.as_str().into_connection_info()?;
        if password.is_some() {
            info.redis.password = password;
        }
        Ok(Self {
            inner: RedisConnectionManager::new(info)?,
            io_timeout,
        })
    }
}

#[async_trait]
impl ManageConnection for RedisManager {
    type Connection = MultiplexedConnection;
    type Error = RedisError;

    async fn connect(&self) -> Result<MultiplexedConnection, RedisError> {
        let mut conn = tokio::time::timeout(self.io_timeout, self.inner.connect())
            .await
            .map_err(|_| {
                RedisError::from(io::Error::new(io::ErrorKind::TimedOut, "redis dial timed out"))
            })??;
        conn.set_response_timeout(self.io_timeout);
        Ok(conn)
    }

    async fn is_valid(&self, conn: &mut MultiplexedConnection) -> Result<(), RedisError> {
        self.inner.is_valid(conn).await
    }

    fn has_broken(&self, conn: &mut MultiplexedConnection) -> bool {
        self.inner.has_broken(conn)
    }
}

#[async_trait]
impl StoreConnection for MultiplexedConnection {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut *self).await?;
        Ok(value)
    }

    async fn set_with_expiry(
        &mut self,
        key: &str,
        value: &[u8],
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        // MULTI / SET / EXPIRE / EXEC: readers never see the key without its TTL.
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query_async(&mut *self)
            .await?;
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut *self).await?;
        Ok(())
    }

    async fn delete_idle(&mut self, prefix: &str, min_idle: Duration) -> Result<usize, StoreError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *self)
                .await?;

            for key in keys {
                let idle: Option<u64> = redis::cmd("OBJECT")
                    .arg("IDLETIME")
                    .arg(&key)
                    .query_async(&mut *self)
                    .await?;
                if idle.is_some_and(|secs| secs >= min_idle.as_secs()) {
                    let deleted: i64 = redis::cmd("DEL").arg(&key).query_async(&mut *self).await?;
                    removed += deleted as usize;
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

/// Escapes Redis glob metacharacters so a prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
