pub mod loader;
pub mod model;
pub mod pattern;
pub mod resolver;
pub mod validator;

use serde::{Deserialize, Serialize};

/// Complete process configuration
///
/// Loaded from an optional JSON file (path in `RATEKEEPER_CONFIG`), with
/// environment overrides for the Redis endpoint and HTTP bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Shared store connection and pool sizing
    pub redis: RedisConfig,

    /// HTTP server bind address
    pub server: ServerConfig,

    /// Limits applied when no key or pattern config matches
    pub default: DefaultLimits,

    /// In-process config cache tuning
    pub cache: CacheConfig,

    /// Allow requests when the store cannot be reached
    pub fail_open: bool,

    /// Feed the Prometheus registry
    pub metrics_enabled: bool,

    /// Log every decision at info instead of debug
    pub detailed_logging: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            server: ServerConfig::default(),
            default: DefaultLimits::default(),
            cache: CacheConfig::default(),
            fail_open: true,
            metrics_enabled: true,
            detailed_logging: false,
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,

    /// Per-command time limit; breaching it surfaces as "store unavailable"
    pub command_timeout_ms: u64,

    pub pool: PoolConfig,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            command_timeout_ms: 500,
            pool: PoolConfig::default(),
        }
    }
}

impl RedisConfig {
    /// Connection URL in the form deadpool/redis expect
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}", password, self.host, self.port),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }
}

/// Connection pool sizing
///
/// `max_active` and `max_wait_ms` map onto the pool directly; `max_idle` and
/// `min_idle` are recognised for parity with the deployment surface but the
/// pool retains idle connections up to `max_active` on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    pub max_active: usize,
    pub max_idle: usize,
    pub min_idle: usize,
    pub max_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 50,
            max_idle: 50,
            min_idle: 5,
            max_wait_ms: 1000,
        }
    }
}

/// HTTP server bind address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Fallback limits when no configuration matches a key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultLimits {
    pub capacity: i64,
    pub refill_rate: f64,
    pub refill_period_seconds: i64,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 10.0,
            refill_period_seconds: 60,
        }
    }
}

/// Exact-key config cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub config_ttl_seconds: u64,
    pub max_size: u64,
    pub enable_stats: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            config_ttl_seconds: 60,
            max_size: 10_000,
            enable_stats: true,
        }
    }
}
