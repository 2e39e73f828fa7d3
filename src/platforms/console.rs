use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::platforms::{BanUntil, EnforcementGateway, MessageSource};
use crate::types::{ChatMessage, EnforcementError};

/// Gateway that performs every enforcement call by logging it.
///
/// Used when no chat transport is configured, so moderation decisions can be
/// observed locally.
#[derive(Debug, Default)]
pub struct ConsoleGateway;

impl ConsoleGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EnforcementGateway for ConsoleGateway {
    async fn ban_member(&self, chat_id: i64, user_id: i64, until: BanUntil) -> Result<(), EnforcementError> {
        match until {
            BanUntil::Never => info!("Would ban user {} in chat {} permanently", user_id, chat_id),
            BanUntil::Until(at) => info!("Would ban user {} in chat {} until {}", user_id, chat_id, at),
        }
        Ok(())
    }

    async fn unban_member(&self, chat_id: i64, user_id: i64) -> Result<(), EnforcementError> {
        info!("Would unban user {} in chat {}", user_id, chat_id);
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), EnforcementError> {
        info!("Would delete message {} in chat {}", message_id, chat_id);
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str, formatted: bool) -> Result<(), EnforcementError> {
        info!("[chat {}{}] {}", chat_id, if formatted { ", markdown" } else { "" }, text);
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "console"
    }
}

/// Reads one JSON-encoded [`ChatMessage`] per line from stdin
pub struct StdinSource {
    message_sender: broadcast::Sender<ChatMessage>,
    reader_task: Option<JoinHandle<()>>,
    is_connected: Arc<RwLock<bool>>,
}

impl StdinSource {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            message_sender: tx,
            reader_task: None,
            is_connected: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    /// Parse a single input line; blank lines and malformed JSON yield `None`
    pub fn parse_line(line: &str) -> Option<ChatMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<ChatMessage>(line) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Skipping malformed message line: {}", e);
                None
            }
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for StdinSource {
    async fn connect(&mut self) -> Result<()> {
        let message_sender = self.message_sender.clone();
        let is_connected = Arc::clone(&self.is_connected);
        *is_connected.write().await = true;

        self.reader_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            info!("Stdin message reader started");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(message) = StdinSource::parse_line(&line) {
                            debug!("Read message {} from chat {}", message.message_id, message.chat_id);
                            if let Err(e) = message_sender.send(message) {
                                warn!("Failed to broadcast message: {}", e);
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }

            *is_connected.write().await = false;
        }));

        Ok(())
    }

    fn get_message_receiver(&self) -> Option<broadcast::Receiver<ChatMessage>> {
        Some(self.message_sender.subscribe())
    }

    fn source_name(&self) -> &str {
        "stdin"
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        *self.is_connected.write().await = false;
        info!("Stdin source disconnected");
        Ok(())
    }
}
