use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::types::{ChatMessage, EnforcementError};

pub mod console;

/// How long a ban lasts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanUntil {
    Never,
    Until(DateTime<Utc>),
}

impl BanUntil {
    pub fn from_expiry(expires_at: Option<DateTime<Utc>>) -> Self {
        expires_at.map_or(BanUntil::Never, BanUntil::Until)
    }

    /// Unix timestamp as chat platforms expect it; 0 means forever
    pub fn unix_timestamp(&self) -> i64 {
        match self {
            BanUntil::Never => 0,
            BanUntil::Until(at) => at.timestamp(),
        }
    }
}

/// Chat-transport capabilities the moderation engine relies on.
///
/// Every call is best effort: the engine logs failures and never retries.
#[async_trait]
pub trait EnforcementGateway: Send + Sync {
    async fn ban_member(&self, chat_id: i64, user_id: i64, until: BanUntil) -> Result<(), EnforcementError>;

    async fn unban_member(&self, chat_id: i64, user_id: i64) -> Result<(), EnforcementError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), EnforcementError>;

    /// Send `text` to the chat; `formatted` enables Markdown rendering
    async fn send_message(&self, chat_id: i64, text: &str, formatted: bool) -> Result<(), EnforcementError>;

    /// Get the platform identifier (e.g., "telegram", "console")
    fn platform_name(&self) -> &str;
}

/// Source of inbound chat messages
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Start producing messages
    async fn connect(&mut self) -> Result<()>;

    /// Get a receiver for incoming messages
    fn get_message_receiver(&self) -> Option<broadcast::Receiver<ChatMessage>>;

    fn source_name(&self) -> &str;

    /// Gracefully stop producing messages
    async fn disconnect(&mut self) -> Result<()>;
}
