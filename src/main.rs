//! Watchpost - Uptime and Endpoint Monitoring
//!
//! Periodically probes a set of monitored targets (web endpoints or raw
//! IPs), records their health history, detects anomalies and outages, and
//! pushes live updates to connected observers.

mod config;
mod db;
mod live;
mod monitor;
mod probe;
mod scheduler;
mod web;

use config::Config;
use db::Store;
use live::LiveChannel;
use monitor::{Notifier, Prober};
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("watchpost=info".parse()?))
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting Watchpost on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Wire up the monitoring engine
    let notifier = Arc::new(Notifier::from_config(&cfg));
    let prober = Arc::new(Prober::new(store.clone(), notifier));
    let live = Arc::new(LiveChannel::new());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        prober,
        live.clone(),
        Duration::from_secs(cfg.sweep_interval_secs),
    ));

    // Start the sweep loop (runs one sweep immediately)
    scheduler.start();

    // Start web server
    let server = Server::new(cfg, store, scheduler, live);
    server.start().await?;

    Ok(())
}
