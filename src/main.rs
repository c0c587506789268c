use campaign_core::application::Application;
use campaign_core::config::Config;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("initializing trading core");

    let config = Config::from_env()?;
    info!(mode = ?config.mode, "configuration loaded");

    let app = match Application::build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to build application");
            return Err(e);
        }
    };

    let handle = match app.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start application");
            return Err(e);
        }
    };

    info!("trading core running, awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    handle.shutdown().await;
    Ok(())
}
