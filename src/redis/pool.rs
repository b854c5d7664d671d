use crate::config::RedisConfig;
use crate::errors::{RateLimitError, Result};
use deadpool::managed::PoolConfig as DeadpoolPoolConfig;
use deadpool_redis::{Config as DeadpoolRedisConfig, Pool, Runtime};
use std::time::Duration;
use tracing::{debug, info};

/// Create a Redis connection pool from configuration
pub async fn create_redis_pool(config: &RedisConfig) -> Result<Pool> {
    info!("Creating Redis connection pool...");

    let mut cfg = DeadpoolRedisConfig::from_url(config.url());

    let mut pool_cfg = DeadpoolPoolConfig::new(config.pool.max_active);
    pool_cfg.timeouts.wait = Some(Duration::from_millis(config.pool.max_wait_ms));
    cfg.pool = Some(pool_cfg);

    let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
        RateLimitError::StoreUnavailable(format!("Pool creation failed: {}", e))
    })?;

    info!(
        "Redis connection pool created (max_active: {}, max_wait: {}ms)",
        config.pool.max_active, config.pool.max_wait_ms
    );

    // Test connection
    debug!("Testing Redis connection...");
    let mut conn = pool.get().await.map_err(|e| {
        RateLimitError::StoreUnavailable(format!("Failed to get connection: {}", e))
    })?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| RateLimitError::StoreUnavailable(format!("PING failed: {}", e)))?;

    info!("Redis connection test successful");

    Ok(pool)
}
