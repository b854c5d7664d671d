use crate::config::model::{Algorithm, LimitConfig};
use crate::errors::{RateLimitError, Result};
use crate::limiter::{float_at, instant_from_millis, int_at, Decision, RateLimitStrategy};
use crate::redis::{RedisClient, ScriptKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX: &str = "ratelimit:leaky:";
const STATE_TTL_SECS: i64 = 3600;

/// Leaky bucket: constant drain rate, no bursts beyond the queue depth.
pub struct LeakyBucketStrategy<R: RedisClient> {
    client: Arc<R>,
}

impl<R: RedisClient> LeakyBucketStrategy<R> {
    pub fn new(client: Arc<R>) -> Self {
        Self { client }
    }

    fn bucket_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl<R: RedisClient + 'static> RateLimitStrategy for LeakyBucketStrategy<R> {
    async fn decide(&self, key: &str, tokens: u32, config: &LimitConfig) -> Result<Decision> {
        let bucket_key = Self::bucket_key(key);
        let now_ms = Utc::now().timestamp_millis();
        let leak_rate = config.rate_per_second();

        let args = vec![
            config.capacity.to_string(),
            leak_rate.to_string(),
            now_ms.to_string(),
            tokens.to_string(),
            STATE_TTL_SECS.to_string(),
        ];

        let values = self
            .client
            .exec_script(ScriptKind::LeakyBucket, &[bucket_key], &args)
            .await?;
        if values.len() < 3 {
            return Err(RateLimitError::ScriptError(format!(
                "Leaky bucket script returned {} values",
                values.len()
            )));
        }

        let allowed = int_at(&values, 0)? == 1;
        let queue_size = float_at(&values, 1)?;
        let wait_seconds = float_at(&values, 2)?;

        let remaining = (config.capacity as f64 - queue_size).floor().max(0.0) as i64;

        let retry_after_seconds = if allowed {
            if wait_seconds > 0.0 {
                debug!(
                    "Request queued for key={}, drain wait {:.2}s",
                    key, wait_seconds
                );
            }
            None
        } else {
            // a zero leak rate divides to inf/nan in the script
            let mut retry = if wait_seconds.is_finite() {
                wait_seconds.ceil() as i64
            } else {
                0
            };
            if retry <= 0 {
                retry = 1;
            }
            Some(retry)
        };

        let decision = Decision {
            allowed,
            remaining,
            reset_at: instant_from_millis(now_ms + config.refill_period_seconds * 1000),
            retry_after_seconds,
            algorithm: Algorithm::LeakyBucket,
        };

        debug!(
            "Leaky bucket check for key={}: allowed={}, queue_size={:.2}",
            key, decision.allowed, queue_size
        );

        Ok(decision)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.client.delete_keys(&[Self::bucket_key(key)]).await?;
        debug!("Reset leaky bucket for key: {}", key);
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::testing::*;
    use crate::redis::ScriptKind;

    #[tokio::test]
    async fn packs_leak_rate_per_second() {
        let client = MockRedis::with_replies(vec![vec![int(1), bulk("1"), bulk("1")]]);
        let strategy = LeakyBucketStrategy::new(client.clone());
        // 1 request per second: refill 60 per 60s
        let config = limit_config(Algorithm::LeakyBucket, 3, 60.0, 60);

        strategy.decide("ip:10.0.0.1", 1, &config).await.unwrap();

        let call = client.last_script_call();
        assert_eq!(call.kind, ScriptKind::LeakyBucket);
        assert_eq!(call.keys, vec!["ratelimit:leaky:ip:10.0.0.1".to_string()]);
        assert_eq!(call.args[0], "3");
        let rate: f64 = call.args[1].parse().unwrap();
        assert!((rate - 1.0).abs() < 1e-9);
        assert_eq!(call.args[3], "1");
        assert_eq!(call.args[4], "3600");
    }

    #[tokio::test]
    async fn first_request_leaves_capacity_minus_cost() {
        let client = MockRedis::with_replies(vec![vec![int(1), bulk("1"), bulk("1")]]);
        let strategy = LeakyBucketStrategy::new(client);
        let config = limit_config(Algorithm::LeakyBucket, 3, 60.0, 60);

        let decision = strategy.decide("ip:10.0.0.1", 1, &config).await.unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
        assert_eq!(decision.retry_after_seconds, None);
    }

    #[tokio::test]
    async fn denied_full_queue_waits_for_drain() {
        // queue 3 of 3 at 1 req/s: one slot frees in 1s
        let client = MockRedis::with_replies(vec![vec![int(0), bulk("3"), bulk("1")]]);
        let strategy = LeakyBucketStrategy::new(client);
        let config = limit_config(Algorithm::LeakyBucket, 3, 60.0, 60);

        let decision = strategy.decide("ip:10.0.0.1", 1, &config).await.unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_seconds, Some(1));
    }

    #[tokio::test]
    async fn degenerate_leak_rate_clamps_retry_to_one_second() {
        for reply in ["inf", "nan", "-2", "0"] {
            let client = MockRedis::with_replies(vec![vec![int(0), bulk("3"), bulk(reply)]]);
            let strategy = LeakyBucketStrategy::new(client);
            let config = limit_config(Algorithm::LeakyBucket, 3, 60.0, 60);

            let decision = strategy.decide("ip:10.0.0.1", 1, &config).await.unwrap();
            assert_eq!(decision.retry_after_seconds, Some(1), "reply {}", reply);
        }
    }

    #[tokio::test]
    async fn fractional_queue_rounds_remaining_down() {
        let client = MockRedis::with_replies(vec![vec![int(1), bulk("1.5"), bulk("1.5")]]);
        let strategy = LeakyBucketStrategy::new(client);
        let config = limit_config(Algorithm::LeakyBucket, 3, 60.0, 60);

        let decision = strategy.decide("ip:10.0.0.1", 1, &config).await.unwrap();
        assert_eq!(decision.remaining, 1);
    }

    #[tokio::test]
    async fn reset_deletes_the_bucket_key() {
        let client = MockRedis::with_replies(vec![]);
        let strategy = LeakyBucketStrategy::new(client.clone());

        strategy.reset("ip:10.0.0.1").await.unwrap();

        let deleted = client.deleted.lock().unwrap();
        assert_eq!(deleted[0], vec!["ratelimit:leaky:ip:10.0.0.1".to_string()]);
    }
}
