pub mod handler;
pub mod request_id;

use crate::config::resolver::ConfigResolver;
use crate::config::ServerConfig;
use crate::errors::{RateLimitError, Result};
use crate::redis::RedisClient;
use crate::service::RateLimitService;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state
pub struct AppState<R: RedisClient> {
    pub service: Arc<RateLimitService<R>>,
    pub resolver: Arc<ConfigResolver<R>>,
    pub client: Arc<R>,
}

impl<R: RedisClient> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            resolver: Arc::clone(&self.resolver),
            client: Arc::clone(&self.client),
        }
    }
}

/// Assemble the full REST surface
pub fn build_router<R: RedisClient + 'static>(state: AppState<R>) -> Router {
    Router::new()
        .route("/api/ratelimit/check", post(handler::check_rate_limit::<R>))
        .route(
            "/api/ratelimit/config/patterns",
            get(handler::list_patterns::<R>),
        )
        .route(
            "/api/ratelimit/config/reload",
            post(handler::reload_configurations::<R>),
        )
        .route("/api/ratelimit/config/{key}", get(handler::get_config::<R>))
        .route(
            "/api/ratelimit/config/keys/{key}",
            post(handler::save_key_config::<R>).delete(handler::delete_key_config::<R>),
        )
        .route(
            "/api/ratelimit/config/patterns/{pattern}",
            post(handler::save_pattern_config::<R>).delete(handler::delete_pattern_config::<R>),
        )
        .route(
            "/api/admin/keys",
            get(handler::list_keys::<R>).delete(handler::reset_key::<R>),
        )
        .route(
            "/api/admin/keys/{pattern}",
            delete(handler::delete_keys_by_pattern::<R>),
        )
        .route("/api/admin/stats", get(handler::system_stats::<R>))
        .route("/api/admin/cache/clear", post(handler::clear_cache::<R>))
        .route("/health", get(handler::health::<R>))
        .route("/metrics", get(handler::metrics_text))
        .layer(middleware::from_fn(request_id::propagate_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown
pub async fn start_server<R: RedisClient + 'static>(
    config: ServerConfig,
    state: AppState<R>,
) -> Result<()> {
    let addr = config.addr();
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        RateLimitError::InternalError(format!("Failed to bind {}: {}", addr, e))
    })?;

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| RateLimitError::InternalError(format!("Server error: {}", e)))?;

    Ok(())
}
