use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

// Flipped once at boot from the `metricsEnabled` process option.
static ENABLED: AtomicBool = AtomicBool::new(true);

pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

lazy_static! {
    // Decision metrics
    pub static ref CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ratekeeper_checks_total",
        "Total number of rate limit checks",
        &["algorithm", "result"]
    ).unwrap();

    pub static ref CHECK_DURATION: HistogramVec = register_histogram_vec!(
        "ratekeeper_check_duration_seconds",
        "Decision duration in seconds",
        &["algorithm"],
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).unwrap();

    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ratekeeper_errors_total",
        "Total number of failed checks by error kind",
        &["kind"]
    ).unwrap();

    // Redis layer
    pub static ref REDIS_OPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ratekeeper_redis_ops_total",
        "Total number of Redis operations",
        &["operation", "status"]
    ).unwrap();

    pub static ref REDIS_DURATION: HistogramVec = register_histogram_vec!(
        "ratekeeper_redis_duration_seconds",
        "Redis operation duration in seconds",
        &["operation"],
        vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]
    ).unwrap();

    // Pattern resolution
    pub static ref PATTERN_HITS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ratekeeper_pattern_hits_total",
        "Config resolutions served by a wildcard pattern",
        &["pattern"]
    ).unwrap();

    pub static ref PATTERN_MISSES_TOTAL: IntCounter = register_int_counter!(
        "ratekeeper_pattern_misses_total",
        "Config resolutions where no pattern matched"
    ).unwrap();

    // Config cache
    pub static ref CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "ratekeeper_cache_hits_total",
        "Exact-key config cache hits"
    ).unwrap();

    pub static ref CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        "ratekeeper_cache_misses_total",
        "Exact-key config cache misses"
    ).unwrap();

    pub static ref CONFIG_RELOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ratekeeper_config_reloads_total",
        "Total number of configuration reloads",
        &["result"]
    ).unwrap();

    pub static ref ACTIVE_KEYS: IntGauge = register_int_gauge!(
        "ratekeeper_active_keys",
        "Number of live bucket keys in the store"
    ).unwrap();
}

/// Record a rate limit check outcome with its observed latency
pub fn record_check(algorithm: &str, allowed: bool, duration_secs: f64) {
    if !enabled() {
        return;
    }
    let result = if allowed { "allowed" } else { "denied" };
    CHECKS_TOTAL.with_label_values(&[algorithm, result]).inc();
    CHECK_DURATION
        .with_label_values(&[algorithm])
        .observe(duration_secs);
}

/// Record a failed check
pub fn record_error(kind: &str) {
    if !enabled() {
        return;
    }
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record a Redis operation
pub fn record_redis_op(operation: &str, success: bool, duration_secs: f64) {
    if !enabled() {
        return;
    }
    let status = if success { "ok" } else { "error" };
    REDIS_OPS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    REDIS_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn record_pattern_hit(pattern: &str) {
    if !enabled() {
        return;
    }
    PATTERN_HITS_TOTAL.with_label_values(&[pattern]).inc();
}

pub fn record_pattern_miss() {
    if !enabled() {
        return;
    }
    PATTERN_MISSES_TOTAL.inc();
}

pub fn record_cache_hit() {
    if !enabled() {
        return;
    }
    CACHE_HITS_TOTAL.inc();
}

pub fn record_cache_miss() {
    if !enabled() {
        return;
    }
    CACHE_MISSES_TOTAL.inc();
}

pub fn record_config_reload(success: bool) {
    if !enabled() {
        return;
    }
    let result = if success { "success" } else { "error" };
    CONFIG_RELOADS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_active_keys(count: i64) {
    if !enabled() {
        return;
    }
    ACTIVE_KEYS.set(count);
}

/// Render the registry in the Prometheus text format
pub fn encode_text() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Failed to convert metrics to UTF-8: {}", e))
}
