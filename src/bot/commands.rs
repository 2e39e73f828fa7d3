// src/bot/commands.rs - Operator chat commands for moderation

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::moderation::ModerationEngine;
use crate::types::{ChatMessage, ModerationError, ViolationKind};

/// Chat message length limit for command replies
pub const MAX_REPLY_CHARS: usize = 4000;

pub struct ModerationCommands {
    engine: Arc<ModerationEngine>,
    command_prefix: Arc<RwLock<String>>,
    admins: Arc<RwLock<HashSet<i64>>>,
    listing_limit: Arc<RwLock<usize>>,
}

impl ModerationCommands {
    pub fn new(engine: Arc<ModerationEngine>, prefix: String, admins: Vec<i64>, listing_limit: usize) -> Self {
        if admins.is_empty() {
            warn!("No command admins configured; /unban and /modsettings are disabled");
        }

        Self {
            engine,
            command_prefix: Arc::new(RwLock::new(prefix)),
            admins: Arc::new(RwLock::new(admins.into_iter().collect())),
            listing_limit: Arc::new(RwLock::new(listing_limit)),
        }
    }

    /// Set the command prefix (default is "/")
    pub async fn set_command_prefix(&self, prefix: String) {
        info!("Command prefix set to: {}", prefix);
        *self.command_prefix.write().await = prefix;
    }

    pub async fn set_admins(&self, admins: Vec<i64>) {
        *self.admins.write().await = admins.into_iter().collect();
    }

    pub async fn set_listing_limit(&self, limit: usize) {
        *self.listing_limit.write().await = limit;
    }

    pub async fn is_admin(&self, chat_user_id: i64) -> bool {
        self.admins.read().await.contains(&chat_user_id)
    }

    /// Split a command message into its lowercased name and arguments
    pub async fn parse_command<'a>(&self, content: &'a str) -> Option<(String, Vec<&'a str>)> {
        let prefix = self.command_prefix.read().await;
        let rest = content.trim_start().strip_prefix(prefix.as_str())?;
        let mut parts = rest.split_whitespace();

        // Commands addressed to a bot carry a `@botname` suffix
        let name = parts.next()?.split('@').next()?.to_lowercase();
        if name.is_empty() {
            return None;
        }
        Some((name, parts.collect()))
    }

    /// Returns `Ok(true)` when the message was a command this system handled
    pub async fn process_message(&self, message: &ChatMessage) -> Result<bool> {
        let Some((command_name, args)) = self.parse_command(&message.content).await else {
            return Ok(false);
        };

        if !message.chat_type.is_moderated() {
            debug!("Ignoring /{} from private chat {}", command_name, message.chat_id);
            return Ok(false);
        }

        self.process_command(&command_name, &args, message).await
    }

    pub async fn process_command(&self, command_name: &str, args: &[&str], message: &ChatMessage) -> Result<bool> {
        match command_name {
            "violations" => {
                self.handle_violations(message).await?;
                Ok(true)
            }
            "unban" => {
                self.handle_unban(args, message).await?;
                Ok(true)
            }
            "modsettings" => {
                self.handle_modsettings(message).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reply(&self, message: &ChatMessage, text: &str, formatted: bool) -> Result<()> {
        self.engine.gateway().send_message(message.chat_id, text, formatted).await?;
        Ok(())
    }

    async fn handle_violations(&self, message: &ChatMessage) -> Result<()> {
        let limit = *self.listing_limit.read().await;
        let violations = self.engine.ledger().list_active(message.chat_id, limit).await?;

        if violations.is_empty() {
            return self.reply(message, "📊 No active violations in this chat", false).await;
        }

        let users = self.engine.users();
        let mut names: HashMap<i64, String> = HashMap::new();
        let mut counts: HashMap<ViolationKind, usize> = HashMap::new();
        let mut lines = String::new();

        for violation in &violations {
            *counts.entry(violation.kind).or_insert(0) += 1;

            if !names.contains_key(&violation.user_id) {
                let name = match users.find_by_id(violation.user_id).await {
                    Ok(Some(user)) => user.display_name().to_string(),
                    Ok(None) => format!("user {}", violation.user_id),
                    Err(e) => {
                        warn!("Failed to look up user {}: {}", violation.user_id, e);
                        format!("user {}", violation.user_id)
                    }
                };
                names.insert(violation.user_id, name);
            }

            lines.push_str(&format!(
                "• {} - {} ({})\n",
                names.get(&violation.user_id).map(String::as_str).unwrap_or_default(),
                violation.reason,
                violation.created_at.format("%d.%m.%Y")
            ));
        }

        let count = |kind: ViolationKind| counts.get(&kind).copied().unwrap_or(0);
        let text = format!(
            "⚠️ Warnings: {}\n🚫 Temporary bans: {}\n🔒 Permanent bans: {}\n\n📊 Violations\n\n{}",
            count(ViolationKind::Warning),
            count(ViolationKind::TempBan),
            count(ViolationKind::PermanentBan),
            lines
        );

        self.reply(message, &truncate_reply(&text, MAX_REPLY_CHARS), false).await
    }

    async fn handle_unban(&self, args: &[&str], message: &ChatMessage) -> Result<()> {
        if !self.is_admin(message.sender_id).await {
            debug!("User {} attempted /unban without admin rights", message.sender_id);
            return Ok(());
        }

        let Some(raw_id) = args.first() else {
            return self.reply(message, "❌ Specify the ID of the user to unban", false).await;
        };
        let Ok(user_id) = raw_id.parse::<i64>() else {
            return self.reply(message, "❌ Invalid user ID format", false).await;
        };

        match self.engine.lift_ban(message.chat_id, user_id).await {
            Ok(cleared) => {
                info!(
                    "User {} unbanned in chat {} by {} ({} violations cleared)",
                    user_id, message.chat_id, message.sender_id, cleared
                );
                self.reply(message, "✅ User unbanned", false).await
            }
            Err(ModerationError::Transport(e)) => {
                error!("Failed to unban user {} in chat {}: {}", user_id, message.chat_id, e);
                self.reply(message, "❌ Failed to unban the user", false).await
            }
            Err(e) => {
                // The platform ban is already lifted
                error!("User {} unbanned but violations were not cleared: {}", user_id, e);
                self.reply(message, "✅ User unbanned", false).await
            }
        }
    }

    async fn handle_modsettings(&self, message: &ChatMessage) -> Result<()> {
        if !self.is_admin(message.sender_id).await {
            debug!("User {} attempted /modsettings without admin rights", message.sender_id);
            return Ok(());
        }

        let settings = self.engine.rules().settings_for(message.chat_id).await;
        let text = format!(
            "⚙️ Moderation settings\n\nAuto-ban: {}\nTemporary ban at: {} violations\nTemporary ban duration: {} hours\nPermanent ban at: {} violations",
            if settings.auto_ban_enabled { "on" } else { "off" },
            settings.warning_threshold,
            settings.temp_ban_duration_hours,
            settings.permanent_ban_threshold
        );
        self.reply(message, &text, false).await
    }
}

/// Cut `text` to `max_chars` characters, marking the cut with "..."
pub fn truncate_reply(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
