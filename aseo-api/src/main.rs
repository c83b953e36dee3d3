//! Service entry point: loads configuration, wires the persistence backend,
//! runs the startup recovery sweep, and serves the HTTP facade.
//!
//! Logging uses `tracing_subscriber::fmt` with an env-filter default of
//! `info`, overridable via `RUST_LOG`.

use std::sync::Arc;

use anyhow::Result;
use aseo_core::config::ServiceConfig;
use aseo_core::persistence::{MemPersistence, PgPersistence, Persistence};
use aseo_api::routes;
use aseo_api::state::AppState;
use chrono::Utc;
use tokio::signal;
use tracing::{info, warn};

fn load_config() -> Result<ServiceConfig> {
    let builder = config::Config::builder()
        .add_source(config::Config::try_from(&ServiceConfig::default())?)
        .add_source(config::Environment::with_prefix("ASEO").separator("__"));
    Ok(builder.build()?.try_deserialize()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("aseo=info".parse()?),
        )
        .init();

    info!("starting autoseo service");

    let config = load_config()?;

    let persistence: Arc<dyn Persistence> = match &config.database.url {
        Some(url) => {
            info!("using postgres persistence backend");
            Arc::new(PgPersistence::connect(url).await?)
        }
        None => {
            warn!("no database url configured, using in-memory persistence backend");
            Arc::new(MemPersistence::new())
        }
    };

    let state = AppState::new(persistence, &config);

    let recovered = state.orchestrator.recover_stuck_sites(Utc::now()).await?;
    if recovered > 0 {
        warn!(count = recovered, "recovered stuck sites on startup");
    }

    let router = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr).await?;
    info!(addr = %config.http.bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("autoseo service stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(err) => warn!("unable to listen for shutdown signal: {}", err),
    }
}
