use crate::config::model::LimitConfig;
use crate::errors::{RateLimitError, Result};
use crate::metrics;
use crate::redis::RedisClient;
use crate::server::AppState;
use crate::service::CheckResult;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";
const HEADER_RETRY_AFTER: &str = "retry-after";

const ADMIN_SCAN_LIMIT: usize = 100_000;
const HEALTH_SCAN_LIMIT: usize = 100_000;

/// Ping latency beyond which the store is reported unhealthy
const HEALTH_LATENCY_THRESHOLD_MS: u64 = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub key: String,
    #[serde(default = "default_tokens")]
    pub tokens: u32,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_tokens() -> u32 {
    1
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    pub remaining_tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<&'static str>,
    pub metadata: CheckMetadata,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckMetadata {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub latency_micros: u64,
}

impl From<CheckResult> for CheckResponse {
    fn from(result: CheckResult) -> Self {
        Self {
            allowed: result.allowed,
            remaining_tokens: result.remaining_tokens,
            reset_time: result
                .reset_time
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            retry_after_seconds: result.retry_after_seconds,
            algorithm: result.algorithm.map(|a| a.as_str()),
            metadata: CheckMetadata {
                key: result.key,
                matched_pattern: result.matched_pattern,
                latency_micros: result.latency_micros,
            },
        }
    }
}

/// POST /api/ratelimit/check
pub async fn check_rate_limit<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Json(request): Json<CheckRequest>,
) -> Result<Response> {
    if request.key.trim().is_empty() {
        return Err(RateLimitError::InvalidKey("key cannot be blank".to_string()));
    }
    if request.tokens < 1 {
        return Err(RateLimitError::InvalidRate(
            "tokens must be at least 1".to_string(),
        ));
    }

    debug!(
        "Rate limit check request: key={}, tokens={}",
        request.key, request.tokens
    );

    let result = state.service.check(&request.key, request.tokens).await;
    let body = CheckResponse::from(result);

    if body.allowed {
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(&body)).into_response();
    let headers = response.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&body.remaining_tokens.to_string()) {
        headers.insert(HEADER_REMAINING, value);
    }
    if let Some(reset) = &body.reset_time {
        if let Ok(value) = HeaderValue::from_str(reset) {
            headers.insert(HEADER_RESET, value);
        }
    }
    if let Some(retry) = body.retry_after_seconds {
        if let Ok(value) = HeaderValue::from_str(&retry.to_string()) {
            headers.insert(HEADER_RETRY_AFTER, value);
        }
    }

    Ok(response)
}

/// GET /api/ratelimit/config/{key} - the resolved config, whatever its source
pub async fn get_config<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Path(key): Path<String>,
) -> Result<Json<LimitConfig>> {
    let resolved = state.resolver.get_config(&key).await?;
    Ok(Json(resolved.config))
}

/// POST /api/ratelimit/config/keys/{key}
pub async fn save_key_config<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Path(key): Path<String>,
    Json(config): Json<LimitConfig>,
) -> Result<StatusCode> {
    state.resolver.save_key_config(&key, config).await?;
    Ok(StatusCode::CREATED)
}

/// POST /api/ratelimit/config/patterns/{pattern}
pub async fn save_pattern_config<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Path(pattern): Path<String>,
    Json(config): Json<LimitConfig>,
) -> Result<StatusCode> {
    state.resolver.save_pattern_config(&pattern, config).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/ratelimit/config/keys/{key}
pub async fn delete_key_config<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Path(key): Path<String>,
) -> Result<StatusCode> {
    state.resolver.delete_key_config(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/ratelimit/config/patterns/{pattern}
pub async fn delete_pattern_config<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Path(pattern): Path<String>,
) -> Result<StatusCode> {
    state.resolver.delete_pattern_config(&pattern).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/ratelimit/config/patterns
pub async fn list_patterns<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
) -> Result<Json<Vec<LimitConfig>>> {
    Ok(Json(state.resolver.get_all_patterns().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub reloaded_patterns: usize,
}

/// POST /api/ratelimit/config/reload
pub async fn reload_configurations<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
) -> Result<Json<ReloadResponse>> {
    let reloaded_patterns = state.resolver.reload_configurations().await?;
    Ok(Json(ReloadResponse { reloaded_patterns }))
}

#[derive(Debug, Deserialize)]
pub struct ListKeysParams {
    #[serde(default = "default_key_limit")]
    pub limit: usize,
}

fn default_key_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: &'static str,
    pub ttl: i64,
}

/// GET /api/admin/keys?limit=N
pub async fn list_keys<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Query(params): Query<ListKeysParams>,
) -> Result<Json<Vec<KeyInfo>>> {
    let keys = state.client.scan_keys("ratelimit:*", params.limit).await?;

    let mut infos = Vec::with_capacity(keys.len());
    for key in keys {
        let ttl = state.client.key_ttl(&key).await?;
        infos.push(KeyInfo {
            key_type: extract_type(&key),
            key,
            ttl,
        });
    }

    Ok(Json(infos))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_keys: usize,
    pub bucket_keys: usize,
    pub sliding_keys: usize,
    pub fixed_keys: usize,
    pub leaky_keys: usize,
    pub swc_keys: usize,
    pub config_keys: usize,
}

/// GET /api/admin/stats - key counts by prefix
pub async fn system_stats<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
) -> Result<Json<SystemStats>> {
    let total = state.client.scan_keys("*", ADMIN_SCAN_LIMIT).await?;
    let buckets = state
        .client
        .scan_keys("ratelimit:*", ADMIN_SCAN_LIMIT)
        .await?;
    let configs = state.client.scan_keys("config:*", ADMIN_SCAN_LIMIT).await?;

    metrics::set_active_keys(buckets.len() as i64);

    let count = |prefix: &str| buckets.iter().filter(|k| k.starts_with(prefix)).count();

    Ok(Json(SystemStats {
        total_keys: total.len(),
        bucket_keys: count("ratelimit:bucket:"),
        sliding_keys: count("ratelimit:sliding:"),
        fixed_keys: count("ratelimit:fixed:"),
        leaky_keys: count("ratelimit:leaky:"),
        swc_keys: count("ratelimit:swc:"),
        config_keys: configs.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResetKeyParams {
    pub key: String,
}

/// DELETE /api/admin/keys?key=K - reset one bucket via its strategy
pub async fn reset_key<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Query(params): Query<ResetKeyParams>,
) -> StatusCode {
    state.service.reset(&params.key).await;
    StatusCode::NO_CONTENT
}

/// DELETE /api/admin/keys/{pattern} - bulk delete by store glob
pub async fn delete_keys_by_pattern<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
    Path(pattern): Path<String>,
) -> Result<StatusCode> {
    let keys = state.client.scan_keys(&pattern, ADMIN_SCAN_LIMIT).await?;
    let removed = state.client.delete_keys(&keys).await?;
    info!("Deleted {} keys matching pattern: {}", removed, pattern);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/cache/clear
pub async fn clear_cache<R: RedisClient + 'static>(
    State(state): State<AppState<R>>,
) -> Result<StatusCode> {
    state.resolver.reload_configurations().await?;
    info!("Configuration cache cleared");
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_keys: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub algorithms: Vec<&'static str>,
}

/// GET /health - store connectivity, latency and live key count
pub async fn health<R: RedisClient + 'static>(State(state): State<AppState<R>>) -> Response {
    let algorithms = crate::config::model::Algorithm::ALL
        .iter()
        .map(|a| a.as_str())
        .collect();

    match state.client.ping().await {
        Ok(latency) => {
            let active_keys = state
                .client
                .scan_keys("ratelimit:*", HEALTH_SCAN_LIMIT)
                .await
                .map(|keys| keys.len())
                .unwrap_or(0);
            metrics::set_active_keys(active_keys as i64);

            let latency_ms = latency.as_millis() as u64;
            let healthy = latency_ms <= HEALTH_LATENCY_THRESHOLD_MS;

            let body = HealthResponse {
                status: if healthy { "up" } else { "down" },
                latency_ms: Some(latency_ms),
                active_keys: Some(active_keys),
                error: if healthy {
                    None
                } else {
                    Some(format!(
                        "store latency {}ms exceeds {}ms threshold",
                        latency_ms, HEALTH_LATENCY_THRESHOLD_MS
                    ))
                },
                algorithms,
            };

            let status = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (status, Json(body)).into_response()
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            let body = HealthResponse {
                status: "down",
                latency_ms: None,
                active_keys: None,
                error: Some(e.to_string()),
                algorithms,
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

/// GET /metrics - Prometheus text format
pub async fn metrics_text() -> Response {
    match metrics::encode_text() {
        Ok(body) => (
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn extract_type(key: &str) -> &'static str {
    if key.starts_with("ratelimit:bucket:") {
        "TOKEN_BUCKET"
    } else if key.starts_with("ratelimit:sliding:") {
        "SLIDING_WINDOW"
    } else if key.starts_with("ratelimit:fixed:") {
        "FIXED_WINDOW"
    } else if key.starts_with("ratelimit:leaky:") {
        "LEAKY_BUCKET"
    } else if key.starts_with("ratelimit:swc:") {
        "SLIDING_WINDOW_COUNTER"
    } else {
        "UNKNOWN"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::Algorithm;
    use chrono::{TimeZone, Utc};

    #[test]
    fn key_type_follows_prefix() {
        assert_eq!(extract_type("ratelimit:bucket:user:1"), "TOKEN_BUCKET");
        assert_eq!(extract_type("ratelimit:sliding:api:x"), "SLIDING_WINDOW");
        assert_eq!(extract_type("ratelimit:fixed:a:100"), "FIXED_WINDOW");
        assert_eq!(extract_type("ratelimit:leaky:ip"), "LEAKY_BUCKET");
        assert_eq!(
            extract_type("ratelimit:swc:a:100"),
            "SLIDING_WINDOW_COUNTER"
        );
        assert_eq!(extract_type("config:key:user:1"), "UNKNOWN");
    }

    #[test]
    fn check_response_serialises_camel_case_and_drops_nulls() {
        let result = CheckResult {
            allowed: false,
            remaining_tokens: 0,
            reset_time: Some(Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap()),
            retry_after_seconds: Some(6),
            algorithm: Some(Algorithm::TokenBucket),
            key: "user:1".to_string(),
            matched_pattern: None,
            latency_micros: 420,
        };

        let json = serde_json::to_value(CheckResponse::from(result)).unwrap();

        assert_eq!(json["allowed"], false);
        assert_eq!(json["remainingTokens"], 0);
        assert_eq!(json["retryAfterSeconds"], 6);
        assert_eq!(json["algorithm"], "TOKEN_BUCKET");
        assert_eq!(json["resetTime"], "2026-08-02T12:00:00.000Z");
        assert_eq!(json["metadata"]["key"], "user:1");
        assert_eq!(json["metadata"]["latencyMicros"], 420);
        assert!(json["metadata"].get("matchedPattern").is_none());
    }

    #[test]
    fn fail_open_response_has_no_reset_or_retry() {
        let result = CheckResult {
            allowed: true,
            remaining_tokens: -1,
            reset_time: None,
            retry_after_seconds: None,
            algorithm: None,
            key: "user:1".to_string(),
            matched_pattern: None,
            latency_micros: 10,
        };

        let json = serde_json::to_value(CheckResponse::from(result)).unwrap();

        assert_eq!(json["allowed"], true);
        assert_eq!(json["remainingTokens"], -1);
        assert!(json.get("resetTime").is_none());
        assert!(json.get("retryAfterSeconds").is_none());
        assert!(json.get("algorithm").is_none());
    }
}
