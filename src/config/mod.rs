// src/config/mod.rs - bot.yaml loading, validation and hot reload

use anyhow::Result;
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;

use crate::bot::moderation::EngineOptions;
use crate::types::{ConcurrencyStrategy, MatchMode, ModerationSettings, SpamSettings, MAX_SPAM_WINDOW_SECONDS};

pub const CONFIG_FILE: &str = "bot.yaml";

/// Loads `bot.yaml` from a configuration directory and keeps it current
#[derive(Clone)]
pub struct ConfigurationManager {
    /// Base directory for configuration files
    config_dir: PathBuf,

    bot_config: Arc<RwLock<BotConfiguration>>,

    /// File watchers for hot-reloading
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,

    /// Event broadcaster for configuration changes
    change_notifier: broadcast::Sender<ConfigChangeEvent>,

    last_reload: Arc<RwLock<std::time::Instant>>,
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone)]
pub enum ConfigChangeEvent {
    BotConfigUpdated { file: String },
    ValidationError { file: String, error: String },
    ReloadComplete { files_updated: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfiguration {
    pub version: String,
    pub description: String,
    pub log_level: String,
    pub moderation: ModerationConfig,
    pub commands: CommandConfig,
    pub dashboard: DashboardConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Thresholds for chats without stored settings
    pub defaults: ModerationSettings,
    pub spam: SpamSettings,
    pub match_mode: MatchMode,
    pub concurrency: ConcurrencyStrategy,
    pub ban_expiry: BanExpiryConfig,
    pub max_reason_length: usize,
    pub violations_listing_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BanExpiryConfig {
    pub deactivate_expired: bool,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub prefix: String,
    /// Chat user ids allowed to run /unban and /modsettings
    pub admins: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot restored at startup and written on shutdown
    pub snapshot_path: Option<PathBuf>,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "Chatwarden moderation configuration".to_string(),
            log_level: "info".to_string(),
            moderation: ModerationConfig::default(),
            commands: CommandConfig::default(),
            dashboard: DashboardConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            defaults: ModerationSettings::default(),
            spam: SpamSettings::default(),
            match_mode: MatchMode::default(),
            concurrency: ConcurrencyStrategy::default(),
            ban_expiry: BanExpiryConfig::default(),
            max_reason_length: 200,
            violations_listing_limit: 50,
        }
    }
}

impl Default for BanExpiryConfig {
    fn default() -> Self {
        Self {
            deactivate_expired: false,
            sweep_interval_seconds: 300,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            admins: Vec::new(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 3000,
        }
    }
}

impl ModerationConfig {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            defaults: self.defaults.clone(),
            spam: self.spam.clone(),
            match_mode: self.match_mode,
            concurrency: self.concurrency,
            max_reason_length: self.max_reason_length,
        }
    }
}

impl BotConfiguration {
    pub fn validate(&self) -> Result<()> {
        self.moderation
            .defaults
            .validate()
            .map_err(|e| anyhow::anyhow!("moderation.defaults: {}", e))?;

        if self.moderation.spam.window_seconds == 0 {
            return Err(anyhow::anyhow!("moderation.spam.window_seconds must be positive"));
        }
        if self.moderation.spam.window_seconds > MAX_SPAM_WINDOW_SECONDS {
            return Err(anyhow::anyhow!(
                "moderation.spam.window_seconds cannot exceed {}",
                MAX_SPAM_WINDOW_SECONDS
            ));
        }
        if self.moderation.max_reason_length == 0 {
            return Err(anyhow::anyhow!("moderation.max_reason_length must be positive"));
        }
        if self.moderation.violations_listing_limit == 0 {
            return Err(anyhow::anyhow!("moderation.violations_listing_limit must be positive"));
        }
        if self.moderation.ban_expiry.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("moderation.ban_expiry.sweep_interval_seconds must be positive"));
        }
        if self.commands.prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("commands.prefix cannot be empty"));
        }
        Ok(())
    }

    /// Apply `DASHBOARD_PORT` and `CHATWARDEN_ADMINS` from the environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("DASHBOARD_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.dashboard.port = port,
                Err(e) => warn!("Ignoring invalid DASHBOARD_PORT '{}': {}", port, e),
            }
        }

        if let Some(admins) = lookup("CHATWARDEN_ADMINS") {
            let mut parsed = Vec::new();
            for raw in admins.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match raw.parse::<i64>() {
                    Ok(id) => parsed.push(id),
                    Err(e) => warn!("Ignoring invalid admin id '{}': {}", raw, e),
                }
            }
            self.commands.admins = parsed;
        }
    }
}

impl ConfigurationManager {
    /// Create a new configuration manager
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            bot_config: Arc::new(RwLock::new(BotConfiguration::default())),
            watchers: Arc::new(RwLock::new(Vec::new())),
            change_notifier: tx,
            last_reload: Arc::new(RwLock::new(std::time::Instant::now())),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Load configuration, creating defaults when the file is missing
    pub async fn initialize(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).await?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        let file_status = if self.config_path().exists() {
            self.load_bot_config().await?;
            CONFIG_FILE.to_string()
        } else {
            warn!("{} not found, writing defaults", self.config_path().display());
            self.create_default_bot_config().await?;
            format!("{} (created default)", CONFIG_FILE)
        };

        let _ = self.change_notifier.send(ConfigChangeEvent::ReloadComplete {
            files_updated: vec![file_status],
        });

        info!("Configuration manager initialized successfully");
        Ok(())
    }

    /// Load and validate bot configuration from file
    async fn load_bot_config(&self) -> Result<()> {
        let config = Self::read_config(&self.config_path()).await?;
        *self.bot_config.write().await = config;

        debug!("Loaded bot configuration from {}", self.config_path().display());
        Ok(())
    }

    async fn read_config(path: &Path) -> Result<BotConfiguration> {
        let content = fs::read_to_string(path).await?;
        let mut config: BotConfiguration = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    async fn create_default_bot_config(&self) -> Result<()> {
        let config = BotConfiguration::default();
        let content = serde_yaml::to_string(&config)?;
        fs::write(self.config_path(), content).await?;

        let mut effective = config;
        effective.apply_env_overrides();
        *self.bot_config.write().await = effective;

        info!("Created default bot configuration: {}", self.config_path().display());
        Ok(())
    }

    /// Watch the configuration directory and reload `bot.yaml` on change
    pub async fn start_watching(&self) -> Result<()> {
        let config_dir = self.config_dir.clone();
        let change_notifier = self.change_notifier.clone();
        let bot_config = self.bot_config.clone();
        let last_reload = self.last_reload.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;

        // Dropping the watcher stops the notifications
        self.watchers.write().await.push(watcher);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                let Some(path) = event
                    .paths
                    .into_iter()
                    .find(|path| path.file_name().map_or(false, |name| name == CONFIG_FILE))
                else {
                    continue;
                };

                // Debounce rapid file changes
                {
                    let now = std::time::Instant::now();
                    let last = *last_reload.read().await;
                    if now.duration_since(last) < Duration::from_millis(500) {
                        continue;
                    }
                    *last_reload.write().await = now;
                }

                info!("Bot configuration file changed, reloading...");
                match Self::read_config(&path).await {
                    Ok(config) => {
                        *bot_config.write().await = config;
                        let _ = change_notifier.send(ConfigChangeEvent::BotConfigUpdated {
                            file: CONFIG_FILE.to_string(),
                        });
                    }
                    Err(e) => {
                        error!("Failed to reload bot config, keeping previous: {}", e);
                        let _ = change_notifier.send(ConfigChangeEvent::ValidationError {
                            file: CONFIG_FILE.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        });

        info!("Watching {} for changes", self.config_dir.display());
        Ok(())
    }

    /// Get current bot configuration
    pub async fn get_bot_config(&self) -> BotConfiguration {
        self.bot_config.read().await.clone()
    }

    /// Subscribe to configuration change events
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    /// Validate and persist a new configuration
    pub async fn save_bot_config(&self, config: BotConfiguration) -> Result<()> {
        config.validate()?;

        let content = serde_yaml::to_string(&config)?;
        fs::write(self.config_path(), content).await?;

        *self.bot_config.write().await = config;
        info!("Saved bot configuration to {}", self.config_path().display());
        Ok(())
    }
}
