// src/types/mod.rs - Domain types shared by the engine, the store and the dashboard

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod errors;

pub use errors::{EnforcementError, ModerationError, SettingsError, StorageError};

/// Inbound chat message handed to the moderation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub message_id: i64,
    /// Chat-platform identity of the sender (not the internal user id)
    pub sender_id: i64,
    pub sender_username: Option<String>,
    pub sender_first_name: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Username when present, otherwise the first name
    pub fn display_name(&self) -> &str {
        match self.sender_username.as_deref() {
            Some(username) if !username.is_empty() => username,
            _ => &self.sender_first_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatType {
    /// Moderation only applies to group and channel contexts
    pub fn is_moderated(self) -> bool {
        !matches!(self, ChatType::Private)
    }
}

/// Enforcement tier recorded on a violation, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Warning,
    TempBan,
    PermanentBan,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::Warning => "warning",
            ViolationKind::TempBan => "temp_ban",
            ViolationKind::PermanentBan => "permanent_ban",
        }
    }

    pub fn is_ban(&self) -> bool {
        !matches!(self, ViolationKind::Warning)
    }

    /// State a user lands in once a violation of this kind is recorded
    pub fn resulting_state(&self) -> ModerationState {
        match self {
            ViolationKind::Warning => ModerationState::Warned,
            ViolationKind::TempBan => ModerationState::TempBanned,
            ViolationKind::PermanentBan => ModerationState::PermaBanned,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a message was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    ForbiddenWords,
    Spam,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::ForbiddenWords => "forbidden_words",
            ViolationCategory::Spam => "spam",
        }
    }

    /// Human-readable reason stored on the ledger row
    pub fn reason(&self) -> &'static str {
        match self {
            ViolationCategory::ForbiddenWords => "Use of forbidden words",
            ViolationCategory::Spam => "Spam messages",
        }
    }
}

/// Derived per-(user, chat) moderation state; never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    Clean,
    Warned,
    TempBanned,
    PermaBanned,
}

/// Longest temporary ban; platforms treat anything past 366 days as permanent
pub const MAX_TEMP_BAN_HOURS: u32 = 24 * 366;

/// Per-chat moderation thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationSettings {
    pub auto_ban_enabled: bool,
    /// Active violation count at which a temporary ban is issued
    pub warning_threshold: u32,
    pub temp_ban_duration_hours: u32,
    /// Active violation count at which a permanent ban is issued
    pub permanent_ban_threshold: u32,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            auto_ban_enabled: true,
            warning_threshold: 3,
            temp_ban_duration_hours: 24,
            permanent_ban_threshold: 5,
        }
    }
}

impl ModerationSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.permanent_ban_threshold <= self.warning_threshold {
            return Err(SettingsError::ThresholdOrder {
                warning: self.warning_threshold,
                permanent: self.permanent_ban_threshold,
            });
        }
        if self.temp_ban_duration_hours == 0 {
            return Err(SettingsError::ZeroDuration);
        }
        if self.temp_ban_duration_hours > MAX_TEMP_BAN_HOURS {
            return Err(SettingsError::DurationTooLong {
                hours: self.temp_ban_duration_hours,
                max: MAX_TEMP_BAN_HOURS,
            });
        }
        Ok(())
    }

    pub fn temp_ban_duration(&self) -> Duration {
        Duration::hours(i64::from(self.temp_ban_duration_hours))
    }
}

/// Administrator-managed banned lexeme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenWord {
    pub id: Uuid,
    pub word: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One enforcement decision against a user in a chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: Uuid,
    /// Internal user id, see [`UserRecord::id`]
    pub user_id: i64,
    pub chat_id: i64,
    pub kind: ViolationKind,
    pub reason: String,
    pub source_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// Ledger append request
#[derive(Debug, Clone)]
pub struct NewViolation {
    pub user_id: i64,
    pub chat_id: i64,
    pub kind: ViolationKind,
    pub reason: String,
    pub source_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionPlan {
    Free,
    Premium,
    Pro,
}

/// Subscriber identity bridging a chat account to subscription state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub chat_user_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub language_code: String,
    pub plan: SubscriptionPlan,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn display_name(&self) -> &str {
        match self.username.as_deref() {
            Some(username) if !username.is_empty() => username,
            _ => &self.first_name,
        }
    }
}

/// How forbidden words are matched against message text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Lowercased substring match; "classic" also hits "classical"
    #[default]
    Substring,
    /// Case-insensitive match on word boundaries
    WholeWord,
}

/// How concurrent evaluations for the same (user, chat) pair are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyStrategy {
    /// Serialize count + append per (user, chat) pair
    #[default]
    PerUserLock,
    /// Evaluate fully in parallel; concurrent messages may both record the same tier
    Unsynchronized,
}

/// Longest spam window accepted from configuration
pub const MAX_SPAM_WINDOW_SECONDS: u64 = 24 * 60 * 60;

/// Spam window parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamSettings {
    pub window_seconds: u64,
    /// Spam fires when strictly more events than this fall in the window
    pub max_events: u32,
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            window_seconds: 30,
            max_events: 5,
        }
    }
}

impl SpamSettings {
    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds.min(MAX_SPAM_WINDOW_SECONDS) as i64)
    }
}
