use crate::config::AppConfig;
use crate::errors::{RateLimitError, Result};
use tracing::{debug, warn};

/// Validate the entire process configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    debug!("Validating configuration...");

    if config.redis.host.is_empty() {
        return Err(RateLimitError::ConfigurationError(
            "redis.host cannot be empty".to_string(),
        ));
    }

    if config.redis.command_timeout_ms == 0 {
        return Err(RateLimitError::ConfigurationError(
            "redis.commandTimeoutMs must be greater than 0".to_string(),
        ));
    }

    if config.redis.pool.max_active == 0 {
        return Err(RateLimitError::ConfigurationError(
            "redis.pool.maxActive must be greater than 0".to_string(),
        ));
    }

    if config.redis.pool.max_active > 1000 {
        warn!(
            "redis.pool.maxActive is very high ({}). This may consume excessive resources.",
            config.redis.pool.max_active
        );
    }

    if config.redis.pool.min_idle > config.redis.pool.max_idle {
        return Err(RateLimitError::ConfigurationError(
            "redis.pool.minIdle cannot exceed redis.pool.maxIdle".to_string(),
        ));
    }

    if config.default.capacity <= 0 {
        return Err(RateLimitError::ConfigurationError(
            "default.capacity must be positive".to_string(),
        ));
    }

    if config.default.refill_rate <= 0.0 {
        return Err(RateLimitError::ConfigurationError(
            "default.refillRate must be positive".to_string(),
        ));
    }

    if config.default.refill_period_seconds <= 0 {
        return Err(RateLimitError::ConfigurationError(
            "default.refillPeriodSeconds must be positive".to_string(),
        ));
    }

    if config.cache.max_size == 0 {
        return Err(RateLimitError::ConfigurationError(
            "cache.maxSize must be greater than 0".to_string(),
        ));
    }

    if config.cache.config_ttl_seconds == 0 {
        return Err(RateLimitError::ConfigurationError(
            "cache.configTtlSeconds must be greater than 0".to_string(),
        ));
    }

    debug!("Configuration validation successful");
    Ok(())
}
