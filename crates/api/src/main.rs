//! Sensor Report Server - Main Entry Point

use api::{init_logging, run_server, AppConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("=== Sensor Report Server v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Serving {:?} source", config.source.backend);

    run_server(config).await?;

    Ok(())
}
