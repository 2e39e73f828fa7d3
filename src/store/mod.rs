// src/store/mod.rs - Persistence contracts consumed by the moderation engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{
    ForbiddenWord, ModerationSettings, NewViolation, StorageError, UserRecord, Violation,
    ViolationKind,
};

pub mod memory;

pub use memory::MemoryStore;

/// Forbidden words and per-chat thresholds
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Lowercased active words, unordered
    async fn active_forbidden_words(&self) -> Result<Vec<String>, StorageError>;

    /// Stored settings for the chat, `None` when the chat has no row
    async fn settings_for(&self, chat_id: i64) -> Result<Option<ModerationSettings>, StorageError>;

    async fn upsert_settings(&self, chat_id: i64, settings: ModerationSettings) -> Result<(), StorageError>;

    /// All words, newest first
    async fn list_forbidden_words(&self) -> Result<Vec<ForbiddenWord>, StorageError>;

    async fn add_forbidden_word(&self, word: &str) -> Result<ForbiddenWord, StorageError>;

    async fn update_forbidden_word(&self, id: Uuid, word: &str, active: bool) -> Result<ForbiddenWord, StorageError>;

    async fn remove_forbidden_word(&self, id: Uuid) -> Result<(), StorageError>;
}

/// Selection criteria for ledger listings
#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub chat_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Restrict to these kinds; empty means all kinds
    pub kinds: Vec<ViolationKind>,
    pub active_only: bool,
    pub limit: Option<usize>,
}

impl ViolationFilter {
    pub fn matches(&self, violation: &Violation) -> bool {
        self.chat_id.map_or(true, |chat| violation.chat_id == chat)
            && self.user_id.map_or(true, |user| violation.user_id == user)
            && (self.kinds.is_empty() || self.kinds.contains(&violation.kind))
            && (!self.active_only || violation.active)
    }
}

/// Append-only record of enforcement decisions.
///
/// Rows are never removed; the only mutation is flipping `active` to false.
/// Counts are always derived by scanning rows.
#[async_trait]
pub trait ViolationLedger: Send + Sync {
    async fn count_active(&self, user_id: i64, chat_id: i64) -> Result<u32, StorageError>;

    /// Active rows for the pair created strictly after `since`
    async fn count_active_since(
        &self,
        user_id: i64,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<u32, StorageError>;

    async fn append(&self, violation: NewViolation) -> Result<Uuid, StorageError>;

    async fn get(&self, id: Uuid) -> Result<Option<Violation>, StorageError>;

    /// Matching rows ordered by creation time descending
    async fn query(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, StorageError>;

    async fn list_active(&self, chat_id: i64, limit: usize) -> Result<Vec<Violation>, StorageError> {
        self.query(&ViolationFilter {
            chat_id: Some(chat_id),
            active_only: true,
            limit: Some(limit),
            ..ViolationFilter::default()
        })
        .await
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StorageError>;

    /// Returns the number of rows flipped to inactive
    async fn deactivate_all_for(&self, user_id: i64, chat_id: i64) -> Result<usize, StorageError>;

    /// Flips active temporary bans whose expiry is at or before `now`
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<Vec<Violation>, StorageError>;
}

/// Subscriber directory owned by the subscription side of the bot
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Finds the user by chat identity, provisioning a free-tier record on first sight
    async fn resolve_or_create(
        &self,
        chat_user_id: i64,
        username: Option<&str>,
        first_name: &str,
    ) -> Result<UserRecord, StorageError>;

    async fn find_by_chat_user_id(&self, chat_user_id: i64) -> Result<Option<UserRecord>, StorageError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StorageError>;
}

/// Handles to the three stores the engine depends on
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub ledger: Arc<dyn ViolationLedger>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn from_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            rules: store.clone(),
            ledger: store.clone(),
            users: store,
        }
    }
}
