use anyhow::Result;
use redis_ratelimit::config::Config;
use redis_ratelimit::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Reads .env, the environment and flags
    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("redis_ratelimit={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting redis-ratelimit demo server");
    tracing::info!(
        "Configuration: bind_addr={}, max_requests={}, window_secs={}, window_mode={:?}, failure_policy={:?}",
        config.bind_addr,
        config.max_requests,
        config.window_secs,
        config.window_mode(),
        config.failure_policy()
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
