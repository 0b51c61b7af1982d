use coopsync::{CoopsyncError, RelayConfig, RelayServerBuilder};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), CoopsyncError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "coopsync relay starting");

    let config = RelayConfig::from_env()?;
    tracing::info!(
        bind = %config.bind_addr,
        max_players = config.room.max_players,
        snapshot_hz = config.room.snapshot_rate_hz,
        "configuration loaded"
    );

    RelayServerBuilder::from_config(config).build().await?.run().await
}
