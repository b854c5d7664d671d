use crate::errors::{RateLimitError, Result};
use crate::redis::ScriptKind;
use lazy_static::lazy_static;
use redis::Script;
use tracing::{debug, info};

lazy_static! {
    static ref TOKEN_BUCKET: Script = Script::new(include_str!("../../scripts/token_bucket.lua"));
    static ref SLIDING_WINDOW: Script =
        Script::new(include_str!("../../scripts/sliding_window.lua"));
    static ref SLIDING_WINDOW_COUNTER: Script =
        Script::new(include_str!("../../scripts/sliding_window_counter.lua"));
    static ref FIXED_WINDOW: Script = Script::new(include_str!("../../scripts/fixed_window.lua"));
    static ref LEAKY_BUCKET: Script = Script::new(include_str!("../../scripts/leaky_bucket.lua"));
}

/// Get the compiled script object for a strategy
pub fn get_script(kind: ScriptKind) -> &'static Script {
    match kind {
        ScriptKind::TokenBucket => &TOKEN_BUCKET,
        ScriptKind::SlidingWindow => &SLIDING_WINDOW,
        ScriptKind::SlidingWindowCounter => &SLIDING_WINDOW_COUNTER,
        ScriptKind::FixedWindow => &FIXED_WINDOW,
        ScriptKind::LeakyBucket => &LEAKY_BUCKET,
    }
}

/// Preload every Lua script so the first decision runs on EVALSHA
pub async fn load_scripts<C: redis::aio::ConnectionLike>(conn: &mut C) -> Result<()> {
    for kind in [
        ScriptKind::TokenBucket,
        ScriptKind::SlidingWindow,
        ScriptKind::SlidingWindowCounter,
        ScriptKind::FixedWindow,
        ScriptKind::LeakyBucket,
    ] {
        let sha = get_script(kind)
            .prepare_invoke()
            .load_async(conn)
            .await
            .map_err(|e| {
                RateLimitError::ScriptError(format!("Failed to load {} script: {}", kind.name(), e))
            })?;
        debug!("Loaded {} (SHA: {})", kind.name(), sha);
    }

    info!("All rate limit scripts loaded into Redis");
    Ok(())
}
