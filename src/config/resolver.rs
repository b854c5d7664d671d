use crate::config::model::{Algorithm, LimitConfig};
use crate::config::pattern::{calculate_priority, find_best_match, CompiledPattern};
use crate::config::{AppConfig, DefaultLimits};
use crate::errors::Result;
use crate::metrics;
use crate::redis::RedisClient;
use arc_swap::ArcSwap;
use chrono::Utc;
use mini_moka::sync::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const KEY_CONFIG_PREFIX: &str = "config:key:";
pub const PATTERN_CONFIG_PREFIX: &str = "config:pattern:";

/// Saved configs self-evict if nobody touches them for a month
const CONFIG_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
const PATTERN_SCAN_LIMIT: usize = 10_000;

/// How a config was resolved for a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    ExactKey,
    Pattern(String),
    Default,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: LimitConfig,
    pub source: ConfigSource,
}

impl ResolvedConfig {
    pub fn matched_pattern(&self) -> Option<&str> {
        match &self.source {
            ConfigSource::Pattern(pattern) => Some(pattern),
            _ => None,
        }
    }
}

/// Exact -> pattern -> default configuration lookup over the store.
///
/// Both in-process caches hold derived data only and can be rebuilt from the
/// store at any time. The exact-key cache is TTL'd; the compiled-pattern set
/// is swapped wholesale under a write lock so pattern mutations stay ordered.
pub struct ConfigResolver<R: RedisClient> {
    client: Arc<R>,
    exact_cache: Cache<String, ResolvedConfig>,
    patterns: ArcSwap<Vec<CompiledPattern>>,
    pattern_write_lock: Mutex<()>,
    defaults: DefaultLimits,
    cache_stats: bool,
}

impl<R: RedisClient> ConfigResolver<R> {
    /// Build the resolver and prime the compiled-pattern cache from the store
    pub async fn new(client: Arc<R>, config: &AppConfig) -> Result<Self> {
        let exact_cache = Cache::builder()
            .max_capacity(config.cache.max_size)
            .time_to_live(Duration::from_secs(config.cache.config_ttl_seconds))
            .build();

        let resolver = Self {
            client,
            exact_cache,
            patterns: ArcSwap::from_pointee(Vec::new()),
            pattern_write_lock: Mutex::new(()),
            defaults: config.default.clone(),
            cache_stats: config.cache.enable_stats,
        };

        let count = resolver.rebuild_pattern_cache().await?;
        info!("Loaded {} pattern configurations into cache", count);

        Ok(resolver)
    }

    /// Resolve the effective config for a key: exact entry, then best
    /// matching pattern, then the process default. Positive results are
    /// cached under the requested key.
    pub async fn get_config(&self, key: &str) -> Result<ResolvedConfig> {
        if let Some(cached) = self.exact_cache.get(&key.to_string()) {
            if self.cache_stats {
                metrics::record_cache_hit();
            }
            return Ok(cached);
        }
        if self.cache_stats {
            metrics::record_cache_miss();
        }

        if let Some(config) = self
            .fetch_config(&format!("{}{}", KEY_CONFIG_PREFIX, key))
            .await?
        {
            return Ok(self.cache_resolved(key, config, ConfigSource::ExactKey));
        }

        let compiled = self.patterns.load_full();
        match find_best_match(key, compiled.iter()) {
            Some(best) => {
                metrics::record_pattern_hit(best.pattern());
                if let Some(config) = self
                    .fetch_config(&format!("{}{}", PATTERN_CONFIG_PREFIX, best.pattern()))
                    .await?
                {
                    let source = ConfigSource::Pattern(best.pattern().to_string());
                    return Ok(self.cache_resolved(key, config, source));
                }
            }
            None => metrics::record_pattern_miss(),
        }

        Ok(self.cache_resolved(key, self.default_config(), ConfigSource::Default))
    }

    /// Save an exact-key config
    pub async fn save_key_config(&self, key: &str, mut config: LimitConfig) -> Result<()> {
        config.validate()?;
        let redis_key = format!("{}{}", KEY_CONFIG_PREFIX, key);
        self.ensure_algorithm_unchanged(&redis_key, &config).await?;

        config.key_pattern = Some(key.to_string());
        stamp(&mut config);

        self.client
            .hash_put_all(&redis_key, &encode_config(&config), CONFIG_TTL)
            .await?;
        self.exact_cache.invalidate(&key.to_string());

        info!("Saved key configuration: {}", key);
        Ok(())
    }

    /// Save a pattern config, computing priority when unset. Any pattern
    /// change may reroute any key, so the whole exact-key cache is dropped.
    pub async fn save_pattern_config(&self, pattern: &str, mut config: LimitConfig) -> Result<()> {
        config.validate()?;
        let redis_key = format!("{}{}", PATTERN_CONFIG_PREFIX, pattern);
        self.ensure_algorithm_unchanged(&redis_key, &config).await?;

        config.key_pattern = Some(pattern.to_string());
        let priority = config
            .priority
            .unwrap_or_else(|| calculate_priority(pattern));
        config.priority = Some(priority);
        stamp(&mut config);

        self.client
            .hash_put_all(&redis_key, &encode_config(&config), CONFIG_TTL)
            .await?;

        {
            let _guard = self.pattern_write_lock.lock().await;
            let mut compiled: Vec<CompiledPattern> = self
                .patterns
                .load()
                .iter()
                .filter(|p| p.pattern() != pattern)
                .cloned()
                .collect();
            if let Some(entry) = CompiledPattern::new(pattern, priority) {
                compiled.push(entry);
            }
            compiled.sort_by(|a, b| a.pattern().cmp(b.pattern()));
            self.patterns.store(Arc::new(compiled));
        }
        self.exact_cache.invalidate_all();

        info!(
            "Saved pattern configuration: {} with priority {}",
            pattern, priority
        );
        Ok(())
    }

    pub async fn delete_key_config(&self, key: &str) -> Result<()> {
        self.client
            .delete_keys(&[format!("{}{}", KEY_CONFIG_PREFIX, key)])
            .await?;
        self.exact_cache.invalidate(&key.to_string());
        info!("Deleted key configuration: {}", key);
        Ok(())
    }

    pub async fn delete_pattern_config(&self, pattern: &str) -> Result<()> {
        self.client
            .delete_keys(&[format!("{}{}", PATTERN_CONFIG_PREFIX, pattern)])
            .await?;

        {
            let _guard = self.pattern_write_lock.lock().await;
            let compiled: Vec<CompiledPattern> = self
                .patterns
                .load()
                .iter()
                .filter(|p| p.pattern() != pattern)
                .cloned()
                .collect();
            self.patterns.store(Arc::new(compiled));
        }
        self.exact_cache.invalidate_all();

        info!("Deleted pattern configuration: {}", pattern);
        Ok(())
    }

    /// List every stored pattern config
    pub async fn get_all_patterns(&self) -> Result<Vec<LimitConfig>> {
        let keys = self
            .client
            .scan_keys(&format!("{}*", PATTERN_CONFIG_PREFIX), PATTERN_SCAN_LIMIT)
            .await?;

        let mut patterns = Vec::with_capacity(keys.len());
        for redis_key in keys {
            if let Some(config) = self.fetch_config(&redis_key).await? {
                patterns.push(config);
            }
        }

        Ok(patterns)
    }

    /// Drop both caches and rebuild the compiled-pattern set from the store
    pub async fn reload_configurations(&self) -> Result<usize> {
        info!("Reloading configurations...");
        self.exact_cache.invalidate_all();

        let result = {
            let _guard = self.pattern_write_lock.lock().await;
            self.rebuild_pattern_cache().await
        };

        match result {
            Ok(count) => {
                metrics::record_config_reload(true);
                info!("Reloaded {} pattern configurations", count);
                Ok(count)
            }
            Err(e) => {
                metrics::record_config_reload(false);
                Err(e)
            }
        }
    }

    async fn rebuild_pattern_cache(&self) -> Result<usize> {
        let patterns = self.get_all_patterns().await?;

        let mut compiled: Vec<CompiledPattern> = patterns
            .iter()
            .filter_map(|config| {
                let pattern = config.key_pattern.as_deref()?;
                let priority = config
                    .priority
                    .unwrap_or_else(|| calculate_priority(pattern));
                CompiledPattern::new(pattern, priority)
            })
            .collect();
        compiled.sort_by(|a, b| a.pattern().cmp(b.pattern()));

        let count = compiled.len();
        self.patterns.store(Arc::new(compiled));
        Ok(count)
    }

    /// Algorithm is immutable for a saved config; delete and recreate to
    /// switch disciplines without stranding bucket state.
    async fn ensure_algorithm_unchanged(&self, redis_key: &str, config: &LimitConfig) -> Result<()> {
        if let Some(existing) = self.fetch_config(redis_key).await? {
            if existing.algorithm != config.algorithm {
                return Err(crate::errors::RateLimitError::ConfigurationError(format!(
                    "algorithm is immutable for a saved config (stored {}, requested {}); delete and recreate to change it",
                    existing.algorithm, config.algorithm
                )));
            }
        }
        Ok(())
    }

    async fn fetch_config(&self, redis_key: &str) -> Result<Option<LimitConfig>> {
        let hash = self.client.hash_get_all(redis_key).await?;
        Ok(decode_config(redis_key, &hash))
    }

    fn cache_resolved(
        &self,
        key: &str,
        config: LimitConfig,
        source: ConfigSource,
    ) -> ResolvedConfig {
        let resolved = ResolvedConfig { config, source };
        self.exact_cache.insert(key.to_string(), resolved.clone());
        resolved
    }

    fn default_config(&self) -> LimitConfig {
        LimitConfig {
            key_pattern: None,
            algorithm: Algorithm::TokenBucket,
            capacity: self.defaults.capacity,
            refill_rate: self.defaults.refill_rate,
            refill_period_seconds: self.defaults.refill_period_seconds,
            priority: Some(0),
            created_at: None,
            updated_at: None,
        }
    }
}

fn stamp(config: &mut LimitConfig) {
    let now = Utc::now();
    config.updated_at = Some(now);
    if config.created_at.is_none() {
        config.created_at = Some(now);
    }
}

fn encode_config(config: &LimitConfig) -> Vec<(String, String)> {
    let mut fields = vec![
        ("algorithm".to_string(), config.algorithm.as_str().to_string()),
        ("capacity".to_string(), config.capacity.to_string()),
        ("refillRate".to_string(), config.refill_rate.to_string()),
        (
            "refillPeriodSeconds".to_string(),
            config.refill_period_seconds.to_string(),
        ),
    ];

    if let Some(pattern) = &config.key_pattern {
        fields.push(("keyPattern".to_string(), pattern.clone()));
    }
    if let Some(priority) = config.priority {
        fields.push(("priority".to_string(), priority.to_string()));
    }

    fields
}

/// Decode a stored config hash. A malformed hash logs a warning and behaves
/// as absent, so resolution falls through to the next source.
fn decode_config(redis_key: &str, hash: &HashMap<String, String>) -> Option<LimitConfig> {
    if hash.is_empty() {
        return None;
    }

    let algorithm = match hash.get("algorithm").and_then(|s| Algorithm::parse(s)) {
        Some(algorithm) => algorithm,
        None => {
            warn!(
                "Invalid config in store - bad or missing algorithm for key: {}",
                redis_key
            );
            return None;
        }
    };

    let capacity = hash.get("capacity").and_then(|s| s.parse::<i64>().ok());
    let refill_rate = hash.get("refillRate").and_then(|s| s.parse::<f64>().ok());
    let refill_period = hash
        .get("refillPeriodSeconds")
        .and_then(|s| s.parse::<i64>().ok());

    let (capacity, refill_rate, refill_period) = match (capacity, refill_rate, refill_period) {
        (Some(c), Some(r), Some(p)) => (c, r, p),
        _ => {
            warn!(
                "Invalid config in store - missing required fields for key: {}",
                redis_key
            );
            return None;
        }
    };

    let priority = hash
        .get("priority")
        .and_then(|s| s.parse::<i32>().ok())
        .unwrap_or(0);

    // older writes omitted the field; derive it from the store key suffix
    let key_pattern = hash.get("keyPattern").cloned().or_else(|| {
        redis_key
            .strip_prefix(PATTERN_CONFIG_PREFIX)
            .or_else(|| redis_key.strip_prefix(KEY_CONFIG_PREFIX))
            .map(str::to_string)
    });

    Some(LimitConfig {
        key_pattern,
        algorithm,
        capacity,
        refill_rate,
        refill_period_seconds: refill_period,
        priority: Some(priority),
        created_at: None,
        updated_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RateLimitError;
    use async_trait::async_trait;

    /// In-memory hash store; scripts are out of scope for resolver tests.
    #[derive(Default)]
    struct MemoryStore {
        hashes: std::sync::Mutex<HashMap<String, HashMap<String, String>>>,
    }

    impl MemoryStore {
        fn put(&self, key: &str, fields: &[(&str, &str)]) {
            let mut hashes = self.hashes.lock().unwrap();
            let entry = hashes.entry(key.to_string()).or_default();
            for (field, value) in fields {
                entry.insert(field.to_string(), value.to_string());
            }
        }
    }

    #[async_trait]
    impl RedisClient for MemoryStore {
        async fn exec_script(
            &self,
            _kind: crate::redis::ScriptKind,
            _keys: &[String],
            _args: &[String],
        ) -> Result<Vec<redis::Value>> {
            Err(RateLimitError::InternalError(
                "no scripts in resolver tests".to_string(),
            ))
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
            Ok(self
                .hashes
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .unwrap_or_default())
        }

        async fn hash_put_all(
            &self,
            key: &str,
            fields: &[(String, String)],
            _ttl: Duration,
        ) -> Result<()> {
            let mut hashes = self.hashes.lock().unwrap();
            let entry = hashes.entry(key.to_string()).or_default();
            for (field, value) in fields {
                entry.insert(field.clone(), value.clone());
            }
            Ok(())
        }

        async fn scan_keys(&self, pattern: &str, limit: usize) -> Result<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            let mut keys: Vec<String> = self
                .hashes
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .take(limit)
                .cloned()
                .collect();
            keys.sort();
            Ok(keys)
        }

        async fn delete_keys(&self, keys: &[String]) -> Result<u64> {
            let mut hashes = self.hashes.lock().unwrap();
            let mut removed = 0;
            for key in keys {
                if hashes.remove(key).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        async fn key_ttl(&self, _key: &str) -> Result<i64> {
            Ok(-1)
        }

        async fn ping(&self) -> Result<Duration> {
            Ok(Duration::from_millis(1))
        }
    }

    fn limit_config(algorithm: Algorithm, capacity: i64) -> LimitConfig {
        LimitConfig {
            key_pattern: None,
            algorithm,
            capacity,
            refill_rate: 10.0,
            refill_period_seconds: 60,
            priority: None,
            created_at: None,
            updated_at: None,
        }
    }

    async fn resolver(store: Arc<MemoryStore>) -> ConfigResolver<MemoryStore> {
        ConfigResolver::new(store, &AppConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn empty_store_resolves_to_default() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        let resolved = resolver.get_config("user:1").await.unwrap();

        assert_eq!(resolved.source, ConfigSource::Default);
        assert_eq!(resolved.config.algorithm, Algorithm::TokenBucket);
        assert_eq!(resolved.config.capacity, 100);
    }

    #[tokio::test]
    async fn exact_key_beats_patterns() {
        let store = Arc::new(MemoryStore::default());
        store.put(
            "config:key:user:1",
            &[
                ("algorithm", "FIXED_WINDOW"),
                ("capacity", "7"),
                ("refillRate", "7"),
                ("refillPeriodSeconds", "10"),
            ],
        );
        store.put(
            "config:pattern:user:*",
            &[
                ("algorithm", "TOKEN_BUCKET"),
                ("capacity", "10"),
                ("refillRate", "10"),
                ("refillPeriodSeconds", "60"),
                ("priority", "10"),
            ],
        );
        let resolver = resolver(store).await;

        let resolved = resolver.get_config("user:1").await.unwrap();

        assert_eq!(resolved.source, ConfigSource::ExactKey);
        assert_eq!(resolved.config.capacity, 7);
        assert_eq!(resolved.matched_pattern(), None);
    }

    #[tokio::test]
    async fn save_get_round_trip_preserves_fields() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        resolver
            .save_key_config("user:1", limit_config(Algorithm::LeakyBucket, 42))
            .await
            .unwrap();
        let resolved = resolver.get_config("user:1").await.unwrap();

        assert_eq!(resolved.source, ConfigSource::ExactKey);
        assert_eq!(resolved.config.algorithm, Algorithm::LeakyBucket);
        assert_eq!(resolved.config.capacity, 42);
        assert_eq!(resolved.config.key_pattern.as_deref(), Some("user:1"));
    }

    #[tokio::test]
    async fn pattern_precedence_and_delete_reroute() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        let mut broad = limit_config(Algorithm::TokenBucket, 10);
        broad.priority = Some(10);
        resolver.save_pattern_config("user:*", broad).await.unwrap();

        let mut narrow = limit_config(Algorithm::TokenBucket, 50);
        narrow.priority = Some(50);
        resolver
            .save_pattern_config("user:premium:*", narrow)
            .await
            .unwrap();

        let premium = resolver.get_config("user:premium:X").await.unwrap();
        assert_eq!(premium.config.capacity, 50);
        assert_eq!(premium.matched_pattern(), Some("user:premium:*"));

        let free = resolver.get_config("user:free:X").await.unwrap();
        assert_eq!(free.config.capacity, 10);
        assert_eq!(free.matched_pattern(), Some("user:*"));

        // deleting the narrow pattern reroutes premium keys to the broad one
        resolver
            .delete_pattern_config("user:premium:*")
            .await
            .unwrap();
        let premium = resolver.get_config("user:premium:X").await.unwrap();
        assert_eq!(premium.config.capacity, 10);
        assert_eq!(premium.matched_pattern(), Some("user:*"));
    }

    #[tokio::test]
    async fn pattern_priority_computed_when_unset() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        resolver
            .save_pattern_config("user:premium:*", limit_config(Algorithm::TokenBucket, 50))
            .await
            .unwrap();

        let patterns = resolver.get_all_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].priority, Some(25));
    }

    #[tokio::test]
    async fn positive_results_are_cached() {
        let store = Arc::new(MemoryStore::default());
        store.put(
            "config:key:user:1",
            &[
                ("algorithm", "TOKEN_BUCKET"),
                ("capacity", "7"),
                ("refillRate", "7"),
                ("refillPeriodSeconds", "10"),
            ],
        );
        let resolver = resolver(store.clone()).await;

        let first = resolver.get_config("user:1").await.unwrap();
        assert_eq!(first.config.capacity, 7);

        // a direct store mutation is invisible until the cache is invalidated
        store.put("config:key:user:1", &[("capacity", "9")]);
        let second = resolver.get_config("user:1").await.unwrap();
        assert_eq!(second.config.capacity, 7);

        resolver.delete_key_config("user:1").await.unwrap();
        let third = resolver.get_config("user:1").await.unwrap();
        assert_eq!(third.source, ConfigSource::Default);
    }

    #[tokio::test]
    async fn pattern_save_invalidates_every_exact_entry() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        // cached as default first
        let resolved = resolver.get_config("user:premium:X").await.unwrap();
        assert_eq!(resolved.source, ConfigSource::Default);

        let mut narrow = limit_config(Algorithm::TokenBucket, 50);
        narrow.priority = Some(50);
        resolver
            .save_pattern_config("user:premium:*", narrow)
            .await
            .unwrap();

        // the new pattern must take effect despite the cached default
        let resolved = resolver.get_config("user:premium:X").await.unwrap();
        assert_eq!(resolved.config.capacity, 50);
    }

    #[tokio::test]
    async fn algorithm_is_immutable_once_saved() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        resolver
            .save_key_config("user:1", limit_config(Algorithm::TokenBucket, 10))
            .await
            .unwrap();

        let err = resolver
            .save_key_config("user:1", limit_config(Algorithm::FixedWindow, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::ConfigurationError(_)));

        // delete + recreate is the sanctioned path
        resolver.delete_key_config("user:1").await.unwrap();
        resolver
            .save_key_config("user:1", limit_config(Algorithm::FixedWindow, 10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_hash_falls_through_to_default() {
        let store = Arc::new(MemoryStore::default());
        store.put(
            "config:key:user:1",
            &[("algorithm", "NOT_AN_ALGORITHM"), ("capacity", "7")],
        );
        let resolver = resolver(store).await;

        let resolved = resolver.get_config("user:1").await.unwrap();
        assert_eq!(resolved.source, ConfigSource::Default);
    }

    #[tokio::test]
    async fn key_pattern_derived_from_store_key_when_absent() {
        let store = Arc::new(MemoryStore::default());
        store.put(
            "config:pattern:api:*",
            &[
                ("algorithm", "TOKEN_BUCKET"),
                ("capacity", "5"),
                ("refillRate", "5"),
                ("refillPeriodSeconds", "60"),
            ],
        );
        let resolver = resolver(store).await;

        let patterns = resolver.get_all_patterns().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].key_pattern.as_deref(), Some("api:*"));

        // and the compiled set built from it routes matching keys
        let resolved = resolver.get_config("api:users").await.unwrap();
        assert_eq!(resolved.config.capacity, 5);
    }

    #[tokio::test]
    async fn reload_picks_up_out_of_band_writes() {
        let store = Arc::new(MemoryStore::default());
        let resolver = resolver(store.clone()).await;

        let resolved = resolver.get_config("api:users").await.unwrap();
        assert_eq!(resolved.source, ConfigSource::Default);

        // another node writes a pattern directly to the store
        store.put(
            "config:pattern:api:*",
            &[
                ("algorithm", "TOKEN_BUCKET"),
                ("capacity", "5"),
                ("refillRate", "5"),
                ("refillPeriodSeconds", "60"),
                ("priority", "15"),
            ],
        );

        let count = resolver.reload_configurations().await.unwrap();
        assert_eq!(count, 1);

        let resolved = resolver.get_config("api:users").await.unwrap();
        assert_eq!(resolved.matched_pattern(), Some("api:*"));
        assert_eq!(resolved.config.capacity, 5);
    }

    #[tokio::test]
    async fn invalid_config_rejected_on_save() {
        let resolver = resolver(Arc::new(MemoryStore::default())).await;

        let mut bad = limit_config(Algorithm::TokenBucket, 0);
        bad.capacity = 0;
        assert!(resolver.save_key_config("user:1", bad).await.is_err());

        let mut oversized = limit_config(Algorithm::SlidingWindow, 20_000);
        oversized.priority = Some(1);
        assert!(resolver
            .save_pattern_config("api:*", oversized)
            .await
            .is_err());
    }
}
