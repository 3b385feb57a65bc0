//! Binary entry point: loads configuration, opens the State Store and
//! Catalog Store connections, runs migrations, and hands off to
//! [`server::App`] to serve the Control API until shutdown.

mod migrations;
mod server;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use airwave_core::{Catalog, Config, StateStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    if let Err(errors) = config.validate() {
        for err in &errors {
            eprintln!("configuration error: {err}");
        }
        anyhow::bail!("invalid configuration ({} error(s))", errors.len());
    }

    airwave_core::logging::init_logging(&config.logging).context("failed to initialize logging")?;
    info!("starting airwave");

    let state_store = StateStore::connect(&config.state_store.url)
        .await
        .context("failed to connect to state store")?;
    info!("connected to state store");

    let catalog = Catalog::connect(&config.catalog_store)
        .await
        .context("failed to connect to catalog store")?;
    info!("connected to catalog store");

    migrations::run_migrations(catalog.pool(), &config.state_store.url)
        .await
        .context("failed to run migrations")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let app = server::App::new(config, state_store, catalog);
    if let Err(e) = app.run(shutdown_rx).await {
        error!("server exited with error: {}", e);
    }

    Ok(())
}
