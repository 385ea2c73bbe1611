use anyhow::Result;
use gemini_gateway::config::Config;
use gemini_gateway::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("gemini_gateway={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let rate_limit_store = if config.redis_url().is_some() { "redis" } else { "memory" };

    tracing::info!("Starting gemini-gateway");
    tracing::info!(
        bind_addr = %config.bind_addr(),
        model = %config.gemini_model,
        timeout = ?config.gemini_timeout,
        default_limits = %config.default_limits,
        generate_limits = %config.generate_limits,
        rate_limit_store,
        "Configuration loaded"
    );

    if config.trust_forwarded_for {
        tracing::warn!(
            "Clients are identified by X-Forwarded-For; the header can be spoofed unless a trusted proxy sets it"
        );
    }

    // Create and run the server
    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
