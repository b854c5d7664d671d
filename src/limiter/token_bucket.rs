use crate::config::model::{Algorithm, LimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::limiter::{float_at, instant_from_millis, int_at, Decision, RateLimitStrategy};
use crate::redis::{RedisClient, ScriptKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX: &str = "ratelimit:bucket:";
const STATE_TTL_SECS: i64 = 3600;

/// Token bucket: bursts up to capacity, smooth long-run refill.
pub struct TokenBucketStrategy<R: RedisClient> {
    client: Arc<R>,
}

impl<R: RedisClient> TokenBucketStrategy<R> {
    pub fn new(client: Arc<R>) -> Self {
        Self { client }
    }

    fn bucket_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl<R: RedisClient + 'static> RateLimitStrategy for TokenBucketStrategy<R> {
    async fn decide(&self, key: &str, tokens: u32, config: &LimitConfig) -> Result<Decision> {
        let bucket_key = Self::bucket_key(key);
        let now_ms = Utc::now().timestamp_millis();

        let args = vec![
            tokens.to_string(),
            config.capacity.to_string(),
            config.rate_per_second().to_string(),
            now_ms.to_string(),
            STATE_TTL_SECS.to_string(),
        ];

        let values = self
            .client
            .exec_script(ScriptKind::TokenBucket, &[bucket_key], &args)
            .await?;
        if values.len() < 3 {
            return Err(RateLimitError::ScriptError(format!(
                "Token bucket script returned {} values",
                values.len()
            )));
        }

        let allowed = int_at(&values, 0)? == 1;
        let remaining = float_at(&values, 1)?;
        let retry_after = float_at(&values, 2)?;

        let decision = Decision {
            allowed,
            remaining: remaining.max(0.0) as i64,
            reset_at: instant_from_millis(now_ms + config.refill_period_seconds * 1000),
            retry_after_seconds: if allowed {
                None
            } else {
                Some(retry_after.ceil().max(0.0) as i64)
            },
            algorithm: Algorithm::TokenBucket,
        };

        debug!(
            "Token bucket check for key={}: allowed={}, remaining={}",
            key, decision.allowed, decision.remaining
        );

        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.client.delete_keys(&[Self::bucket_key(key)]).await?;
        debug!("Reset token bucket for key: {}", key);
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}
