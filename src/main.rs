// src/main.rs - Chatwarden binary: config, store, stdin transport and dashboard

use anyhow::Result;
use log::{error, info, warn};
use std::env;
use std::sync::Arc;

use chatwarden::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config_dir = env::var("CHATWARDEN_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config_manager = ConfigurationManager::new(&config_dir);
    let init_result = config_manager.initialize().await;
    let config = config_manager.get_bot_config().await;

    // The logger filter comes from bot.yaml, so it starts after the first load
    init_logging(&config.log_level);
    if let Err(e) = init_result {
        error!("Failed to load configuration from {}: {}", config_dir, e);
        return Err(e);
    }

    info!("Starting Chatwarden v{}", chatwarden::VERSION);
    info!("Configuration loaded from {}", config_manager.config_path().display());

    let store = match &config.storage.snapshot_path {
        Some(path) if path.exists() => MemoryStore::load_snapshot(path).await?,
        Some(path) => {
            info!("No snapshot at {}, starting with an empty store", path.display());
            MemoryStore::new()
        }
        None => MemoryStore::new(),
    };
    let stores = Stores::from_memory(store.clone());

    let gateway: Arc<dyn EnforcementGateway> = Arc::new(ConsoleGateway::new());
    let bot = Arc::new(ModerationBot::new(stores.clone(), gateway, &config));
    bot.add_source(Box::new(StdinSource::new())).await;
    bot.start().await?;

    if let Err(e) = config_manager.start_watching().await {
        warn!("Configuration hot reload unavailable: {}", e);
    }
    let config_task = bot.watch_config(config_manager.clone());

    if config.dashboard.enabled {
        start_dashboard(&bot, stores, config.dashboard.port);
    }

    info!("Reading JSON messages from stdin; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    config_task.abort();
    bot.shutdown().await?;

    if let Some(path) = &config.storage.snapshot_path {
        match store.save_snapshot(path).await {
            Ok(()) => info!("Saved store snapshot to {}", path.display()),
            Err(e) => error!("Failed to save store snapshot to {}: {}", path.display(), e),
        }
    }

    info!("Chatwarden stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let level = level.parse::<log::LevelFilter>().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[cfg(feature = "web")]
fn start_dashboard(bot: &ModerationBot, stores: Stores, port: u16) {
    let dashboard = WebDashboard::new(DashboardState::new(bot.engine(), stores));

    tokio::spawn(async move {
        if let Err(e) = dashboard.start_server(port).await {
            error!("Web dashboard failed: {}", e);
        }
    });
}

#[cfg(not(feature = "web"))]
fn start_dashboard(_bot: &ModerationBot, _stores: Stores, port: u16) {
    warn!("Dashboard enabled on port {} but the binary was built without the `web` feature", port);
}
