use anyhow::Result;
use takoden::Poller;
use takoden::config::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

    takoden::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Takoden Octopus Energy Japan driver starting up");

    let mut poller =
        Poller::new(config).map_err(|e| anyhow::anyhow!("Failed to create poller: {}", e))?;

    match poller.run().await {
        Ok(()) => {
            info!("Poller shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Poller failed with error: {}", e);
            Err(anyhow::anyhow!("Poller error: {}", e))
        }
    }
}
