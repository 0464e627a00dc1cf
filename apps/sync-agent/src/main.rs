use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod agent;
mod config;

use agent::SyncAgent;
use config::Config;

/// Used when the configured log level is not a valid filter
const DEFAULT_LOG_FILTER: &str =
    "tandem_sync_agent=debug,tandem_realtime_client=info,tandem_http_client=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(config.log_filter())
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listen = config.listen;

    tracing::info!(
        environment = %config.environment(),
        couple_key = %config.couple_key,
        listen,
        "Starting Tandem sync agent"
    );

    let agent = SyncAgent::new(config, true)?;

    if agent.sync_once().await {
        tracing::info!("Latest change synced");
    }

    if listen {
        let received = agent
            .listen(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                }
            })
            .await?;
        tracing::info!(received, "Realtime listener stopped");
    }

    Ok(())
}
