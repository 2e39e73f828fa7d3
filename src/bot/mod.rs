// src/bot/mod.rs - Moderation bot: wiring and per-message dispatch

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::{BotConfiguration, ConfigChangeEvent, ConfigurationManager};
use crate::platforms::{EnforcementGateway, MessageSource};
use crate::store::Stores;
use crate::types::ChatMessage;

pub mod commands;
pub mod escalation;
pub mod moderation;
pub mod notifications;
pub mod reconciliation;
pub mod rules;
pub mod spam;

use commands::ModerationCommands;
use moderation::{ModerationEngine, ModerationOutcome};
use reconciliation::ExpiryReconciler;

/// Connects message sources to the moderation engine and operator commands
pub struct ModerationBot {
    sources: Arc<RwLock<HashMap<String, Box<dyn MessageSource>>>>,
    engine: Arc<ModerationEngine>,
    commands: Arc<ModerationCommands>,
    reconciler: Option<Arc<ExpiryReconciler>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ModerationBot {
    pub fn new(stores: Stores, gateway: Arc<dyn EnforcementGateway>, config: &BotConfiguration) -> Self {
        let reconciler = config.moderation.ban_expiry.deactivate_expired.then(|| {
            Arc::new(ExpiryReconciler::new(
                stores.ledger.clone(),
                config.moderation.ban_expiry.sweep_interval_seconds,
            ))
        });

        let engine = Arc::new(ModerationEngine::new(stores, gateway, config.moderation.engine_options()));
        let commands = Arc::new(ModerationCommands::new(
            Arc::clone(&engine),
            config.commands.prefix.clone(),
            config.commands.admins.clone(),
            config.moderation.violations_listing_limit,
        ));

        Self {
            sources: Arc::new(RwLock::new(HashMap::new())),
            engine,
            commands,
            reconciler,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> Arc<ModerationEngine> {
        Arc::clone(&self.engine)
    }

    pub fn commands(&self) -> Arc<ModerationCommands> {
        Arc::clone(&self.commands)
    }

    /// Add a message source to the bot
    pub async fn add_source(&self, source: Box<dyn MessageSource>) {
        let name = source.source_name().to_string();
        info!("Added {} message source", name);
        self.sources.write().await.insert(name, source);
    }

    /// Connect every source and start processing messages
    pub async fn start(&self) -> Result<()> {
        let mut receivers = Vec::new();
        {
            let mut sources = self.sources.write().await;
            for (name, source) in sources.iter_mut() {
                match source.connect().await {
                    Ok(()) => {
                        info!("Connected {} source", name);
                        match source.get_message_receiver() {
                            Some(receiver) => receivers.push((name.clone(), receiver)),
                            None => warn!("{} source has no message receiver", name),
                        }
                    }
                    Err(e) => error!("Failed to connect {} source: {}", name, e),
                }
            }
        }

        if receivers.is_empty() {
            return Err(anyhow::anyhow!("No message sources connected"));
        }

        let mut tasks = self.tasks.lock().await;
        for (name, receiver) in receivers {
            tasks.push(self.spawn_processor(name, receiver));
        }

        if let Some(reconciler) = &self.reconciler {
            tasks.push(reconciler.start());
        }

        info!("Moderation bot started");
        Ok(())
    }

    fn spawn_processor(&self, name: String, mut receiver: broadcast::Receiver<ChatMessage>) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let commands = Arc::clone(&self.commands);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        let engine = Arc::clone(&engine);
                        let commands = Arc::clone(&commands);
                        // Messages are evaluated independently; per-user ordering lives in the engine
                        tokio::spawn(async move {
                            Self::handle_message(&engine, &commands, &message).await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} receiver lagged by {} messages", name, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("{} receiver closed", name);
                        break;
                    }
                }
            }
        })
    }

    /// Commands take precedence; anything else goes through moderation
    pub async fn handle_message(
        engine: &ModerationEngine,
        commands: &ModerationCommands,
        message: &ChatMessage,
    ) -> Option<ModerationOutcome> {
        match commands.process_message(message).await {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => {
                error!("Failed to process command from {} in chat {}: {}", message.sender_id, message.chat_id, e);
                return None;
            }
        }

        match engine.evaluate(message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Evaluation of message {} in chat {} aborted: {}",
                    message.message_id, message.chat_id, e
                );
                None
            }
        }
    }

    /// Push reloaded configuration into the running components
    pub async fn apply_config(&self, config: &BotConfiguration) {
        self.engine.apply_options(&config.moderation.engine_options()).await;
        self.commands.set_command_prefix(config.commands.prefix.clone()).await;
        self.commands.set_admins(config.commands.admins.clone()).await;
        self.commands
            .set_listing_limit(config.moderation.violations_listing_limit)
            .await;
    }

    /// Follow configuration changes for the lifetime of the bot
    pub fn watch_config(self: &Arc<Self>, config_manager: ConfigurationManager) -> JoinHandle<()> {
        let bot = Arc::clone(self);
        let mut changes = config_manager.subscribe_to_changes();

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(ConfigChangeEvent::BotConfigUpdated { file }) => {
                        info!("Applying updated configuration from {}", file);
                        bot.apply_config(&config_manager.get_bot_config().await).await;
                    }
                    Ok(ConfigChangeEvent::ValidationError { file, error }) => {
                        warn!("Configuration {} rejected: {}", file, error);
                    }
                    Ok(event) => debug!("Configuration event: {:?}", event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Configuration watcher lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop background tasks and disconnect every source
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down moderation bot...");

        if let Some(reconciler) = &self.reconciler {
            reconciler.stop();
        }

        let mut sources = self.sources.write().await;
        for (name, source) in sources.iter_mut() {
            if let Err(e) = source.disconnect().await {
                error!("Error disconnecting {} source: {}", name, e);
            }
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        info!("Moderation bot shutdown complete");
        Ok(())
    }
}
