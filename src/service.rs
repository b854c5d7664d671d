use crate::config::model::Algorithm;
use crate::config::resolver::ConfigResolver;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::limiter::{Decision, StrategyRegistry};
use crate::metrics;
use crate::redis::RedisClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Retry hint handed to callers when the store is down and the policy is
/// fail-closed.
const FAIL_CLOSED_RETRY_SECONDS: i64 = 60;

/// Everything the boundary needs to answer a check request
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining_tokens: i64,
    pub reset_time: Option<DateTime<Utc>>,
    pub retry_after_seconds: Option<i64>,
    pub algorithm: Option<Algorithm>,
    pub key: String,
    pub matched_pattern: Option<String>,
    pub latency_micros: u64,
}

/// Decision orchestrator: resolve config, dispatch to the strategy, time the
/// call, record metrics, and apply the failure policy.
///
/// Re-entrant and stateless; any number of in-flight decisions may share one
/// instance.
pub struct RateLimitService<R: RedisClient> {
    resolver: Arc<ConfigResolver<R>>,
    registry: StrategyRegistry,
    fail_open: bool,
    detailed_logging: bool,
}

impl<R: RedisClient + 'static> RateLimitService<R> {
    pub fn new(
        resolver: Arc<ConfigResolver<R>>,
        registry: StrategyRegistry,
        config: &AppConfig,
    ) -> Self {
        Self {
            resolver,
            registry,
            fail_open: config.fail_open,
            detailed_logging: config.detailed_logging,
        }
    }

    /// Check whether `tokens` may be consumed from the bucket behind `key`.
    ///
    /// Strategy and store failures never propagate: with fail-open (the
    /// default) the caller gets a synthetic allow with `remaining = -1`,
    /// with fail-closed a denial with a fixed retry hint.
    pub async fn check(&self, key: &str, tokens: u32) -> CheckResult {
        let started = Instant::now();

        match self.try_check(key, tokens).await {
            Ok((decision, matched_pattern)) => {
                let latency = started.elapsed();
                metrics::record_check(
                    decision.algorithm.as_str(),
                    decision.allowed,
                    latency.as_secs_f64(),
                );

                if self.detailed_logging {
                    info!(
                        "Check key={} tokens={} algorithm={} allowed={} remaining={} latency={}us",
                        key,
                        tokens,
                        decision.algorithm,
                        decision.allowed,
                        decision.remaining,
                        latency.as_micros()
                    );
                } else {
                    debug!(
                        "Check key={} allowed={} remaining={}",
                        key, decision.allowed, decision.remaining
                    );
                }

                CheckResult {
                    allowed: decision.allowed,
                    remaining_tokens: decision.remaining,
                    reset_time: Some(decision.reset_at),
                    retry_after_seconds: decision.retry_after_seconds,
                    algorithm: Some(decision.algorithm),
                    key: key.to_string(),
                    matched_pattern,
                    latency_micros: latency.as_micros() as u64,
                }
            }
            Err(e) => {
                error!("Error processing rate limit check for key {}: {}", key, e);
                metrics::record_error(e.metric_kind());
                let latency_micros = started.elapsed().as_micros() as u64;

                if self.fail_open {
                    warn!("Failing open for key '{}': {}", key, e);
                    CheckResult {
                        allowed: true,
                        remaining_tokens: -1,
                        reset_time: None,
                        retry_after_seconds: None,
                        algorithm: None,
                        key: key.to_string(),
                        matched_pattern: None,
                        latency_micros,
                    }
                } else {
                    CheckResult {
                        allowed: false,
                        remaining_tokens: 0,
                        reset_time: None,
                        retry_after_seconds: Some(FAIL_CLOSED_RETRY_SECONDS),
                        algorithm: None,
                        key: key.to_string(),
                        matched_pattern: None,
                        latency_micros,
                    }
                }
            }
        }
    }

    async fn try_check(&self, key: &str, tokens: u32) -> Result<(Decision, Option<String>)> {
        let resolved = self.resolver.get_config(key).await?;
        let strategy = self.registry.get(resolved.config.algorithm)?;
        let decision = strategy.decide(key, tokens, &resolved.config).await?;
        Ok((
            decision,
            resolved.matched_pattern().map(str::to_string),
        ))
    }

    /// Delete the bucket state behind `key`. Failures are logged and counted
    /// but not propagated; reset is an operator convenience, not a decision.
    pub async fn reset(&self, key: &str) {
        match self.try_reset(key).await {
            Ok(()) => info!("Reset rate limit state for key: {}", key),
            Err(e) => {
                error!("Error resetting rate limit for key {}: {}", key, e);
                metrics::record_error(e.metric_kind());
            }
        }
    }

    async fn try_reset(&self, key: &str) -> Result<()> {
        let resolved = self.resolver.get_config(key).await?;
        let strategy = self.registry.get(resolved.config.algorithm)?;
        strategy.reset(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::LimitConfig;
    use crate::errors::RateLimitError;
    use crate::limiter::RateLimitStrategy;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Store double with no stored configs, so every key resolves to default
    #[derive(Default)]
    struct EmptyStore;

    #[async_trait]
    impl RedisClient for EmptyStore {
        async fn exec_script(
            &self,
            _kind: crate::redis::ScriptKind,
            _keys: &[String],
            _args: &[String],
        ) -> Result<Vec<redis::Value>> {
            Err(RateLimitError::StoreUnavailable("down".to_string()))
        }

        async fn hash_get_all(&self, _key: &str) -> Result<HashMap<String, String>> {
            Ok(HashMap::new())
        }

        async fn hash_put_all(
            &self,
            _key: &str,
            _fields: &[(String, String)],
            _ttl: Duration,
        ) -> Result<()> {
            Ok(())
        }

        async fn scan_keys(&self, _pattern: &str, _limit: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
            Ok(keys.len() as u64)
        }

        async fn key_ttl(&self, _key: &str) -> Result<i64> {
            Ok(-2)
        }

        async fn ping(&self) -> Result<Duration> {
            Ok(Duration::from_millis(1))
        }
    }

    struct StubStrategy {
        algorithm: Algorithm,
        fail: bool,
    }

    #[async_trait]
    impl RateLimitStrategy for StubStrategy {
        async fn decide(
            &self,
            _key: &str,
            tokens: u32,
            config: &LimitConfig,
        ) -> Result<Decision> {
            if self.fail {
                return Err(RateLimitError::StoreUnavailable("down".to_string()));
            }
            Ok(Decision {
                allowed: true,
                remaining: config.capacity - tokens as i64,
                reset_at: Utc::now(),
                retry_after_seconds: None,
                algorithm: self.algorithm,
            })
        }

        async fn reset(&self, _key: &str) -> Result<()> {
            Ok(())
        }

        fn algorithm(&self) -> Algorithm {
            self.algorithm
        }
    }

    fn registry(fail: bool) -> StrategyRegistry {
        StrategyRegistry::new(
            Algorithm::ALL
                .iter()
                .map(|&algorithm| {
                    Arc::new(StubStrategy { algorithm, fail })
                        as Arc<dyn RateLimitStrategy>
                })
                .collect(),
        )
        .unwrap()
    }

    async fn service(fail: bool, fail_open: bool) -> RateLimitService<EmptyStore> {
        let mut config = AppConfig::default();
        config.fail_open = fail_open;

        let resolver = Arc::new(
            ConfigResolver::new(Arc::new(EmptyStore), &config)
                .await
                .unwrap(),
        );
        RateLimitService::new(resolver, registry(fail), &config)
    }

    #[tokio::test]
    async fn successful_check_carries_metadata() {
        let service = service(false, true).await;

        let result = service.check("user:1", 3).await;

        assert!(result.allowed);
        // default capacity 100 minus the 3 requested
        assert_eq!(result.remaining_tokens, 97);
        assert_eq!(result.algorithm, Some(Algorithm::TokenBucket));
        assert_eq!(result.key, "user:1");
        assert!(result.reset_time.is_some());
    }

    #[tokio::test]
    async fn fail_open_returns_synthetic_allow() {
        let service = service(true, true).await;

        let result = service.check("user:1", 1).await;

        assert!(result.allowed);
        assert_eq!(result.remaining_tokens, -1);
        assert_eq!(result.retry_after_seconds, None);
        assert_eq!(result.algorithm, None);
        assert!(result.reset_time.is_none());
    }

    #[tokio::test]
    async fn fail_closed_denies_with_retry_hint() {
        let service = service(true, false).await;

        let result = service.check("user:1", 1).await;

        assert!(!result.allowed);
        assert_eq!(result.remaining_tokens, 0);
        assert_eq!(result.retry_after_seconds, Some(60));
        assert_eq!(result.algorithm, None);
    }
}
