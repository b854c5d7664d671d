use crate::errors::{RateLimitError, Result};
use crate::metrics;
use crate::redis::{script, RedisClient, ScriptKind};
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error};

const SCAN_BATCH: usize = 100;

/// Redis client implementation over a deadpool connection pool
pub struct RedisClientImpl {
    pool: Pool,
    command_timeout: Duration,
}

impl RedisClientImpl {
    /// Create a new client and preload the rate limit scripts
    pub async fn new(pool: Pool, command_timeout: Duration) -> Result<Self> {
        let client = Self {
            pool,
            command_timeout,
        };

        let mut conn = client.conn().await?;
        script::load_scripts(&mut conn).await?;

        Ok(client)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| {
            error!("Failed to get Redis connection: {}", e);
            RateLimitError::StoreUnavailable(format!("Pool exhausted: {}", e))
        })
    }

    /// Run a Redis future under the command timeout, recording the op metric.
    /// Transport faults and timeouts surface as "store unavailable"; anything
    /// else is a command or script fault depending on the operation.
    async fn timed<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let started = Instant::now();
        let outcome = match timeout(self.command_timeout, fut).await {
            Err(_) => Err(RateLimitError::StoreUnavailable(format!(
                "{} timed out after {}ms",
                operation,
                self.command_timeout.as_millis()
            ))),
            Ok(Err(e)) => Err(map_redis_error(operation, e)),
            Ok(Ok(value)) => Ok(value),
        };

        metrics::record_redis_op(operation, outcome.is_ok(), started.elapsed().as_secs_f64());
        outcome
    }
}

fn is_transport_fault(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_refusal() || e.is_connection_dropped()
}

fn map_redis_error(operation: &str, e: redis::RedisError) -> RateLimitError {
    if is_transport_fault(&e) {
        RateLimitError::StoreUnavailable(format!("{}: {}", operation, e))
    } else if operation.starts_with("script:") {
        RateLimitError::ScriptError(format!("{}: {}", operation, e))
    } else {
        RateLimitError::CommandError(format!("{}: {}", operation, e))
    }
}

#[async_trait]
impl RedisClient for RedisClientImpl {
    async fn exec_script(
        &self,
        kind: ScriptKind,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<redis::Value>> {
        let mut conn = self.conn().await?;

        let script = script::get_script(kind);
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }

        debug!("Executing {}: keys={:?}", kind.name(), keys);

        self.timed(
            kind.name(),
            invocation.invoke_async::<Vec<redis::Value>>(&mut conn),
        )
        .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        self.timed("hgetall", conn.hgetall(key)).await
    }

    async fn hash_put_all(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.hset_multiple(key, fields).ignore();
        pipe.expire(key, ttl.as_secs() as i64).ignore();

        self.timed("hset", pipe.query_async::<()>(&mut conn)).await
    }

    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);

            let (next, batch): (u64, Vec<String>) = self
                .timed("scan", cmd.query_async(&mut conn))
                .await?;

            for key in batch {
                if keys.len() >= limit {
                    return Ok(keys);
                }
                keys.push(key);
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn().await?;
        self.timed("del", conn.del(keys)).await
    }

    async fn key_ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        self.timed("ttl", conn.ttl(key)).await
    }

    async fn ping(&self) -> Result<Duration> {
        let mut conn = self.conn().await?;
        let started = Instant::now();

        let response: String = self
            .timed("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;

        if response != "PONG" {
            return Err(RateLimitError::CommandError(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        Ok(started.elapsed())
    }
}
