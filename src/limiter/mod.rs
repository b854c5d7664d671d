pub mod fixed_window;
pub mod leaky_bucket;
pub mod sliding_window;
pub mod sliding_window_counter;
pub mod token_bucket;

use crate::config::model::{Algorithm, LimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::redis::RedisClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub use fixed_window::FixedWindowStrategy;
pub use leaky_bucket::LeakyBucketStrategy;
pub use sliding_window::SlidingWindowStrategy;
pub use sliding_window_counter::SlidingWindowCounterStrategy;
pub use token_bucket::TokenBucketStrategy;

/// Outcome of a rate limit decision
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Remaining allowance after this decision, never negative
    pub remaining: i64,

    /// When the counter resets
    pub reset_at: DateTime<Utc>,

    /// Seconds until a denied caller may retry; absent on allowed responses
    pub retry_after_seconds: Option<i64>,

    /// Which discipline produced the decision
    pub algorithm: Algorithm,
}

/// One rate limiting discipline: build keys, run the atomic script, project
/// the result tuple into a `Decision`.
#[async_trait]
pub trait RateLimitStrategy: Send + Sync {
    /// Check whether `tokens` may be consumed from the bucket behind `key`
    async fn decide(&self, key: &str, tokens: u32, config: &LimitConfig) -> Result<Decision>;

    /// Delete the bucket state for `key`
    async fn reset(&self, key: &str) -> Result<()>;

    fn algorithm(&self) -> Algorithm;
}

/// Tag-to-strategy mapping populated once at startup.
///
/// Every algorithm tag must have a registered strategy; a missing tag is a
/// fatal init error, which removes runtime dispatch failures entirely.
pub struct StrategyRegistry {
    strategies: HashMap<Algorithm, Arc<dyn RateLimitStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new(strategies: Vec<Arc<dyn RateLimitStrategy>>) -> Result<Self> {
        let mut map: HashMap<Algorithm, Arc<dyn RateLimitStrategy>> = HashMap::new();
        for strategy in strategies {
            map.insert(strategy.algorithm(), strategy);
        }

        for algorithm in Algorithm::ALL {
            if !map.contains_key(&algorithm) {
                return Err(RateLimitError::InternalError(format!(
                    "No strategy registered for algorithm {}",
                    algorithm
                )));
            }
        }

        Ok(Self { strategies: map })
    }

    /// Build the full registry over one store client
    pub fn with_client<R: RedisClient + 'static>(client: Arc<R>) -> Result<Self> {
        Self::new(vec![
            Arc::new(TokenBucketStrategy::new(client.clone())),
            Arc::new(SlidingWindowStrategy::new(client.clone())),
            Arc::new(SlidingWindowCounterStrategy::new(client.clone())),
            Arc::new(FixedWindowStrategy::new(client.clone())),
            Arc::new(LeakyBucketStrategy::new(client)),
        ])
    }

    pub fn get(&self, algorithm: Algorithm) -> Result<&dyn RateLimitStrategy> {
        self.strategies
            .get(&algorithm)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                RateLimitError::InternalError(format!("Unsupported algorithm: {}", algorithm))
            })
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Decode an integer at `idx` of a script reply tuple
pub(crate) fn int_at(values: &[redis::Value], idx: usize) -> Result<i64> {
    match values.get(idx) {
        Some(redis::Value::Int(v)) => Ok(*v),
        Some(redis::Value::Double(v)) => Ok(*v as i64),
        Some(redis::Value::BulkString(bytes)) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                RateLimitError::ScriptError(format!("Invalid integer at index {}", idx))
            }),
        other => Err(RateLimitError::ScriptError(format!(
            "Unexpected value at index {}: {:?}",
            idx, other
        ))),
    }
}

/// Decode a float at `idx`; scripts return floats as bulk strings because an
/// integer reply would truncate them
pub(crate) fn float_at(values: &[redis::Value], idx: usize) -> Result<f64> {
    match values.get(idx) {
        Some(redis::Value::Int(v)) => Ok(*v as f64),
        Some(redis::Value::Double(v)) => Ok(*v),
        Some(redis::Value::BulkString(bytes)) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| RateLimitError::ScriptError(format!("Invalid float at index {}", idx))),
        other => Err(RateLimitError::ScriptError(format!(
            "Unexpected value at index {}: {:?}",
            idx, other
        ))),
    }
}

pub(crate) fn instant_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

pub(crate) fn instant_from_secs(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}
