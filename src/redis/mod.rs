pub mod client;
pub mod pool;
pub mod script;

use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Atomic server-side scripts available to the strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    TokenBucket,
    SlidingWindow,
    SlidingWindowCounter,
    FixedWindow,
    LeakyBucket,
}

impl ScriptKind {
    /// Metric label for the operation
    pub fn name(&self) -> &'static str {
        match self {
            ScriptKind::TokenBucket => "script:token_bucket",
            ScriptKind::SlidingWindow => "script:sliding_window",
            ScriptKind::SlidingWindowCounter => "script:sliding_window_counter",
            ScriptKind::FixedWindow => "script:fixed_window",
            ScriptKind::LeakyBucket => "script:leaky_bucket",
        }
    }
}

/// Thin contract over the shared store.
///
/// Scripts execute atomically with respect to each other; a failed call
/// distinguishes "store unavailable" (pool, transport, timeout) from "script
/// error" (logic fault). No retries at this layer.
#[async_trait]
pub trait RedisClient: Send + Sync {
    /// Execute a named atomic script with keys and packed arguments
    async fn exec_script(
        &self,
        script: ScriptKind,
        keys: &[String],
        args: &[String],
    ) -> Result<Vec<redis::Value>>;

    /// Fetch all fields of a hash; missing keys yield an empty map
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Write hash fields and refresh the key TTL
    async fn hash_put_all(&self, key: &str, fields: &[(String, String)], ttl: Duration)
        -> Result<()>;

    /// Cursor-scan keys matching a glob pattern, up to `limit`
    async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>>;

    /// Delete keys, returning how many existed
    async fn delete_keys(&self, keys: &[String]) -> Result<u64>;

    /// Remaining TTL in seconds (-1 no expiry, -2 missing)
    async fn key_ttl(&self, key: &str) -> Result<i64>;

    /// Liveness probe returning round-trip latency
    async fn ping(&self) -> Result<Duration>;
}
