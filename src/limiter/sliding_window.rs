use crate::config::model::{Algorithm, LimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::limiter::{instant_from_millis, int_at, Decision, RateLimitStrategy};
use crate::redis::{RedisClient, ScriptKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const KEY_PREFIX: &str = "ratelimit:sliding:";

/// Extra TTL on top of the window so a full window of history survives
/// between requests.
const TTL_GRACE_SECS: i64 = 60;

/// Sliding window log: an exact rolling window over a sorted set of request
/// ids scored by epoch millis. Precise, at the cost of one member per
/// admitted token.
pub struct SlidingWindowStrategy<R: RedisClient> {
    client: Arc<R>,
}

impl<R: RedisClient> SlidingWindowStrategy<R> {
    pub fn new(client: Arc<R>) -> Self {
        Self { client }
    }

    fn window_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl<R: RedisClient + 'static> RateLimitStrategy for SlidingWindowStrategy<R> {
    async fn decide(&self, key: &str, tokens: u32, config: &LimitConfig) -> Result<Decision> {
        let window_key = Self::window_key(key);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = config.refill_period_seconds * 1000;
        let request_id = Uuid::new_v4().to_string();

        let args = vec![
            config.capacity.to_string(),
            window_ms.to_string(),
            now_ms.to_string(),
            request_id,
            (config.refill_period_seconds + TTL_GRACE_SECS).to_string(),
            tokens.to_string(),
        ];

        let values = self
            .client
            .exec_script(ScriptKind::SlidingWindow, &[window_key], &args)
            .await?;
        if values.len() < 3 {
            return Err(RateLimitError::ScriptError(format!(
                "Sliding window script returned {} values",
                values.len()
            )));
        }

        let allowed = int_at(&values, 0)? == 1;
        let remaining = int_at(&values, 1)?;
        let oldest_ms = int_at(&values, 2)?;

        // the window frees up when its oldest entry ages out
        let reset_ms = if oldest_ms > 0 {
            oldest_ms + window_ms
        } else {
            now_ms + window_ms
        };

        let decision = Decision {
            allowed,
            remaining: remaining.max(0),
            reset_at: instant_from_millis(reset_ms),
            retry_after_seconds: if allowed {
                None
            } else {
                Some(((reset_ms - now_ms).max(0)) / 1000)
            },
            algorithm: Algorithm::SlidingWindow,
        };

        debug!(
            "Sliding window check for key={}: allowed={}, remaining={}",
            key, decision.allowed, decision.remaining
        );

        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.client.delete_keys(&[Self::window_key(key)]).await?;
        debug!("Reset sliding window for key: {}", key);
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}
