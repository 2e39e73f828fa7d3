//! # Chatwarden
//!
//! Automated moderation for group chats: forbidden-word and spam detection
//! with escalating sanctions.
//!
//! ## Features
//!
//! - **Violation escalation**: warning, temporary ban and permanent ban tiers derived
//!   from the count of active violations per user and chat
//! - **Append-only ledger**: every decision is recorded before it is enforced
//! - **Spam rate detection**: repeat offenders in a trailing window are flagged
//! - **Per-chat settings**: thresholds and ban durations with injected defaults
//! - **Operator commands**: `/violations`, `/unban`, `/modsettings`
//! - **Dashboard API**: JSON endpoints behind the `web` feature
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatwarden::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = MemoryStore::new();
//!     store.add_forbidden_word("casino").await?;
//!
//!     let bot = ModerationBot::new(
//!         Stores::from_memory(store),
//!         Arc::new(ConsoleGateway::new()),
//!         &BotConfiguration::default(),
//!     );
//!     bot.add_source(Box::new(StdinSource::new())).await;
//!     bot.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bot.shutdown().await
//! }
//! ```

pub mod types;
pub mod store;
pub mod platforms;
pub mod bot;
pub mod config;

#[cfg(feature = "web")]
pub mod web;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::moderation::{EngineOptions, ModerationEngine, ModerationOutcome};
    pub use crate::bot::ModerationBot;
    pub use crate::config::{BotConfiguration, ConfigurationManager};
    pub use crate::platforms::{
        console::{ConsoleGateway, StdinSource},
        BanUntil, EnforcementGateway, MessageSource,
    };
    pub use crate::store::{MemoryStore, RuleStore, Stores, UserDirectory, ViolationLedger};
    pub use crate::types::{
        ChatMessage, ChatType, ModerationError, ModerationSettings, ModerationState, Violation,
        ViolationCategory, ViolationKind,
    };
    #[cfg(feature = "web")]
    pub use crate::web::{DashboardState, WebDashboard};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
