use ratekeeper::config::loader::load_config;
use ratekeeper::config::resolver::ConfigResolver;
use ratekeeper::limiter::StrategyRegistry;
use ratekeeper::redis::client::RedisClientImpl;
use ratekeeper::redis::pool::create_redis_pool;
use ratekeeper::server::{start_server, AppState};
use ratekeeper::service::RateLimitService;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratekeeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Rate Limit Decision Service Starting...");

    // Load and validate configuration
    let app_config = load_config().await?;
    ratekeeper::metrics::set_enabled(app_config.metrics_enabled);

    // Create Redis connection pool
    tracing::info!("Initializing Redis connection pool...");
    let redis_pool = create_redis_pool(&app_config.redis).await?;
    tracing::info!("Redis connection pool initialized");

    // Create Redis client and preload the atomic scripts
    let command_timeout = Duration::from_millis(app_config.redis.command_timeout_ms);
    let redis_client = Arc::new(RedisClientImpl::new(redis_pool, command_timeout).await?);
    tracing::info!("Redis client ready");

    // Build the configuration resolver (primes the pattern cache)
    let resolver = Arc::new(ConfigResolver::new(redis_client.clone(), &app_config).await?);
    tracing::info!("Configuration resolver ready");

    // Build the strategy registry; a missing algorithm is fatal here
    let registry = StrategyRegistry::with_client(redis_client.clone())?;
    tracing::info!(
        "Strategy registry initialized with {} algorithms",
        registry.len()
    );

    // Assemble the decision orchestrator
    let service = Arc::new(RateLimitService::new(
        resolver.clone(),
        registry,
        &app_config,
    ));
    tracing::info!("Rate limit service initialized");

    let state = AppState {
        service,
        resolver,
        client: redis_client,
    };

    // Start the HTTP server
    start_server(app_config.server.clone(), state).await?;

    Ok(())
}
