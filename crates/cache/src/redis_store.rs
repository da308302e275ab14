//! Networked cache backend over Redis.
//!
//! Uses a `ConnectionManager`, which reconnects on its own after the server
//! drops the connection. Every call is bounded by a timeout so a hung
//! server can never stall a foreground request.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::backend::{CacheBackend, StoreError, StoreResult};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 200;

pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Operation(e.to_string())
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> StoreResult<Self> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(map_redis_error)?;
        info!("Connected to Redis cache store");
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        timeout(self.op_timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
            .map_err(map_redis_error)
    }
}

#[async_trait]
impl CacheBackend for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // EX must be positive
        let seconds = ttl.as_secs().max(1);
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("EX").arg(seconds);
        let _: () = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.bounded(cmd.query_async(&mut conn)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.bounded(cmd.query_async(&mut conn)).await
    }

    async fn delete_matching(&self, pattern: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;

        // SCAN instead of KEYS so a large keyspace never blocks the server
        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) =
                self.bounded(scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let count: u64 = self.bounded(del.query_async(&mut conn)).await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Removed {} Redis keys matching {}", removed, pattern);
        Ok(removed)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        let reply: String = self.bounded(cmd.query_async(&mut conn)).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Operation(format!("unexpected PING reply: {}", reply)))
        }
    }
}
