use crate::config::model::{Algorithm, LimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::limiter::{instant_from_secs, int_at, Decision, RateLimitStrategy};
use crate::redis::{RedisClient, ScriptKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX: &str = "ratelimit:fixed:";
const RESET_SCAN_LIMIT: usize = 1000;

/// Fixed window: the cheapest discipline, one counter per window.
///
/// Known boundary anomaly: a client timing requests across the window seam
/// can be admitted up to twice the capacity within two window lengths. This
/// is inherent to the algorithm and left uncorrected; callers needing
/// boundary precision should pick SLIDING_WINDOW or SLIDING_WINDOW_COUNTER.
pub struct FixedWindowStrategy<R: RedisClient> {
    client: Arc<R>,
}

impl<R: RedisClient> FixedWindowStrategy<R> {
    pub fn new(client: Arc<R>) -> Self {
        Self { client }
    }

    fn window_key(key: &str, window_start: i64) -> String {
        format!("{}{}:{}", KEY_PREFIX, key, window_start)
    }
}

#[async_trait]
impl<R: RedisClient + 'static> RateLimitStrategy for FixedWindowStrategy<R> {
    async fn decide(&self, key: &str, tokens: u32, config: &LimitConfig) -> Result<Decision> {
        let now_secs = Utc::now().timestamp();
        let window = config.refill_period_seconds;
        let window_start = now_secs - now_secs.rem_euclid(window);

        let counter_key = Self::window_key(key, window_start);
        let args = vec![
            config.capacity.to_string(),
            window.to_string(),
            tokens.to_string(),
        ];

        let values = self
            .client
            .exec_script(ScriptKind::FixedWindow, &[counter_key], &args)
            .await?;
        if values.len() < 2 {
            return Err(RateLimitError::ScriptError(format!(
                "Fixed window script returned {} values",
                values.len()
            )));
        }

        let allowed = int_at(&values, 0)? == 1;
        let remaining = int_at(&values, 1)?;

        let window_end = window_start + window;

        let decision = Decision {
            allowed,
            remaining: remaining.max(0),
            reset_at: instant_from_secs(window_end),
            retry_after_seconds: if allowed {
                None
            } else {
                Some((window_end - now_secs).max(0))
            },
            algorithm: Algorithm::FixedWindow,
        };

        debug!(
            "Fixed window check for key={}, window={}: allowed={}, remaining={}",
            key, window_start, decision.allowed, decision.remaining
        );

        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        // every window start gets its own counter key
        let pattern = format!("{}{}:*", KEY_PREFIX, key);
        let keys = self.client.scan_keys(&pattern, RESET_SCAN_LIMIT).await?;
        self.client.delete_keys(&keys).await?;
        debug!("Reset fixed window for key pattern: {}", pattern);
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}
