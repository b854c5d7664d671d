use crate::config::model::{Algorithm, LimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::limiter::{float_at, instant_from_secs, int_at, Decision, RateLimitStrategy};
use crate::redis::{RedisClient, ScriptKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX: &str = "ratelimit:swc:";
const RESET_SCAN_LIMIT: usize = 1000;

/// Sliding window counter: approximates the log variant at constant memory
/// by weighting the previous window's count with its remaining overlap.
pub struct SlidingWindowCounterStrategy<R: RedisClient> {
    client: Arc<R>,
}

impl<R: RedisClient> SlidingWindowCounterStrategy<R> {
    pub fn new(client: Arc<R>) -> Self {
        Self { client }
    }

    fn window_key(key: &str, window_start: i64) -> String {
        format!("{}{}:{}", KEY_PREFIX, key, window_start)
    }
}

#[async_trait]
impl<R: RedisClient + 'static> RateLimitStrategy for SlidingWindowCounterStrategy<R> {
    async fn decide(&self, key: &str, tokens: u32, config: &LimitConfig) -> Result<Decision> {
        let now_secs = Utc::now().timestamp();
        let window = config.refill_period_seconds;
        let current_start = now_secs - now_secs.rem_euclid(window);
        let previous_start = current_start - window;

        let keys = vec![
            Self::window_key(key, current_start),
            Self::window_key(key, previous_start),
        ];
        let args = vec![
            config.capacity.to_string(),
            window.to_string(),
            now_secs.to_string(),
            tokens.to_string(),
        ];

        let values = self
            .client
            .exec_script(ScriptKind::SlidingWindowCounter, &keys, &args)
            .await?;
        if values.len() < 3 {
            return Err(RateLimitError::ScriptError(format!(
                "Sliding window counter script returned {} values",
                values.len()
            )));
        }

        let allowed = int_at(&values, 0)? == 1;
        let weighted = float_at(&values, 1)?;
        let current_count = int_at(&values, 2)?;

        let window_end = current_start + window;

        let decision = Decision {
            allowed,
            remaining: (config.capacity - weighted.ceil() as i64).max(0),
            reset_at: instant_from_secs(window_end),
            retry_after_seconds: if allowed {
                None
            } else {
                Some((window_end - now_secs).max(0))
            },
            algorithm: Algorithm::SlidingWindowCounter,
        };

        debug!(
            "Sliding window counter check for key={}: allowed={}, weighted={:.2}, current={}",
            key, decision.allowed, weighted, current_count
        );

        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        // both window counters carry a start-time suffix
        let pattern = format!("{}{}:*", KEY_PREFIX, key);
        let keys = self.client.scan_keys(&pattern, RESET_SCAN_LIMIT).await?;
        self.client.delete_keys(&keys).await?;
        debug!("Reset sliding window counter for key pattern: {}", pattern);
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }
}
