use crate::config::validator::validate_config;
use crate::config::AppConfig;
use crate::errors::{RateLimitError, Result};
use std::path::Path;
use tracing::{debug, info};

/// Load process configuration from a JSON file
pub async fn load_config_from_file<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(RateLimitError::FileSystemError)?;

    let config: AppConfig = serde_json::from_str(&contents).map_err(RateLimitError::JsonError)?;

    Ok(config)
}

/// Load complete process configuration
///
/// Reads the JSON file named by `RATEKEEPER_CONFIG` when set (defaults apply
/// when the variable is unset), then applies environment overrides for the
/// Redis endpoint and HTTP bind, validates, and logs a summary.
pub async fn load_config() -> Result<AppConfig> {
    info!("Loading application configuration...");

    let mut config = match std::env::var("RATEKEEPER_CONFIG") {
        Ok(path) => load_config_from_file(&path).await?,
        Err(_) => {
            debug!("RATEKEEPER_CONFIG not set, using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config);
    validate_config(&config)?;

    info!("Application configuration loaded and validated successfully");
    log_config_summary(&config);

    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(host) = std::env::var("REDIS_HOST") {
        config.redis.host = host;
    }
    if let Ok(port) = std::env::var("REDIS_PORT") {
        if let Ok(port) = port.parse() {
            config.redis.port = port;
        }
    }
    if let Ok(password) = std::env::var("REDIS_PASSWORD") {
        config.redis.password = Some(password);
    }
    if let Ok(host) = std::env::var("HTTP_HOST") {
        config.server.host = host;
    }
    if let Ok(port) = std::env::var("HTTP_PORT") {
        if let Ok(port) = port.parse() {
            config.server.port = port;
        }
    }
}

/// Log a summary of the loaded configuration (safe - masks password)
fn log_config_summary(config: &AppConfig) {
    info!("=== Configuration Summary ===");
    info!("Redis URL: {}", mask_password(&config.redis.url()));
    info!("Redis Command Timeout: {}ms", config.redis.command_timeout_ms);
    info!(
        "Redis Pool: max_active={}, max_idle={}, min_idle={}, max_wait={}ms",
        config.redis.pool.max_active,
        config.redis.pool.max_idle,
        config.redis.pool.min_idle,
        config.redis.pool.max_wait_ms
    );
    info!("HTTP Server: {}", config.server.addr());
    info!(
        "Default Limits: capacity={}, refill {} tokens/{}s",
        config.default.capacity, config.default.refill_rate, config.default.refill_period_seconds
    );
    info!(
        "Config Cache: ttl={}s, max_size={}, stats={}",
        config.cache.config_ttl_seconds, config.cache.max_size, config.cache.enable_stats
    );
    info!("Fail Open: {}", config.fail_open);
    info!("Metrics Enabled: {}", config.metrics_enabled);
    info!("Detailed Logging: {}", config.detailed_logging);
    info!("=============================");
}

/// Mask password in Redis URL for safe logging
fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
