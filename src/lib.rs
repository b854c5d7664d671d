pub mod config;
pub mod errors;
pub mod limiter;
pub mod metrics;
pub mod redis;
pub mod server;
pub mod service;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{RateLimitError, Result};
pub use server::{build_router, start_server, AppState};
pub use service::RateLimitService;
