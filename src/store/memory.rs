// src/store/memory.rs - In-process store with JSON snapshots

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RuleStore, UserDirectory, ViolationFilter, ViolationLedger};
use crate::types::{
    ForbiddenWord, ModerationSettings, NewViolation, StorageError, SubscriptionPlan, UserRecord,
    Violation, ViolationKind,
};

const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    users: HashMap<i64, UserRecord>,
    next_user_id: i64,
    violations: Vec<Violation>,
    settings: HashMap<i64, ModerationSettings>,
    forbidden_words: Vec<ForbiddenWord>,
}

/// Store backed by shared in-memory tables. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a snapshot written by [`MemoryStore::save_snapshot`]
    pub async fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = fs::read_to_string(path.as_ref()).await?;
        let state: StoreState = serde_json::from_str(&content)?;
        info!(
            "Loaded snapshot from {}: {} users, {} violations, {} forbidden words",
            path.as_ref().display(),
            state.users.len(),
            state.violations.len(),
            state.forbidden_words.len()
        );
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Write every table to `path` as JSON, replacing the file atomically
    pub async fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let path = path.as_ref();
        let content = {
            let state = self.state.read().await;
            serde_json::to_string_pretty(&*state)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, path).await?;
        debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Total rows in the ledger, active or not
    pub async fn violation_count(&self) -> usize {
        self.state.read().await.violations.len()
    }
}

fn normalize_word(word: &str) -> Result<String, StorageError> {
    let normalized = word.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(StorageError::Conflict("forbidden word cannot be empty".to_string()));
    }
    Ok(normalized)
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn active_forbidden_words(&self) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .forbidden_words
            .iter()
            .filter(|w| w.active)
            .map(|w| w.word.to_lowercase())
            .collect())
    }

    async fn settings_for(&self, chat_id: i64) -> Result<Option<ModerationSettings>, StorageError> {
        Ok(self.state.read().await.settings.get(&chat_id).cloned())
    }

    async fn upsert_settings(&self, chat_id: i64, settings: ModerationSettings) -> Result<(), StorageError> {
        self.state.write().await.settings.insert(chat_id, settings);
        Ok(())
    }

    async fn list_forbidden_words(&self) -> Result<Vec<ForbiddenWord>, StorageError> {
        let mut words = self.state.read().await.forbidden_words.clone();
        words.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(words)
    }

    async fn add_forbidden_word(&self, word: &str) -> Result<ForbiddenWord, StorageError> {
        let word = normalize_word(word)?;
        let mut state = self.state.write().await;

        if state.forbidden_words.iter().any(|w| w.word == word) {
            return Err(StorageError::Conflict(format!("forbidden word '{}' already exists", word)));
        }

        let record = ForbiddenWord {
            id: Uuid::new_v4(),
            word,
            active: true,
            created_at: Utc::now(),
        };
        state.forbidden_words.push(record.clone());
        Ok(record)
    }

    async fn update_forbidden_word(&self, id: Uuid, word: &str, active: bool) -> Result<ForbiddenWord, StorageError> {
        let word = normalize_word(word)?;
        let mut state = self.state.write().await;

        if state.forbidden_words.iter().any(|w| w.word == word && w.id != id) {
            return Err(StorageError::Conflict(format!("forbidden word '{}' already exists", word)));
        }

        let record = state
            .forbidden_words
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("forbidden word {}", id)))?;
        record.word = word;
        record.active = active;
        Ok(record.clone())
    }

    async fn remove_forbidden_word(&self, id: Uuid) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let before = state.forbidden_words.len();
        state.forbidden_words.retain(|w| w.id != id);
        if state.forbidden_words.len() == before {
            return Err(StorageError::NotFound(format!("forbidden word {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ViolationLedger for MemoryStore {
    async fn count_active(&self, user_id: i64, chat_id: i64) -> Result<u32, StorageError> {
        let state = self.state.read().await;
        let count = state
            .violations
            .iter()
            .filter(|v| v.active && v.user_id == user_id && v.chat_id == chat_id)
            .count();
        Ok(count as u32)
    }

    async fn count_active_since(
        &self,
        user_id: i64,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let state = self.state.read().await;
        let count = state
            .violations
            .iter()
            .filter(|v| v.active && v.user_id == user_id && v.chat_id == chat_id && v.created_at > since)
            .count();
        Ok(count as u32)
    }

    async fn append(&self, violation: NewViolation) -> Result<Uuid, StorageError> {
        let record = Violation {
            id: Uuid::new_v4(),
            user_id: violation.user_id,
            chat_id: violation.chat_id,
            kind: violation.kind,
            reason: violation.reason,
            source_text: violation.source_text,
            created_at: violation.created_at,
            expires_at: violation.expires_at,
            active: true,
        };
        let id = record.id;
        self.state.write().await.violations.push(record);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Violation>, StorageError> {
        let state = self.state.read().await;
        Ok(state.violations.iter().find(|v| v.id == id).cloned())
    }

    async fn query(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, StorageError> {
        let state = self.state.read().await;
        let mut rows: Vec<Violation> = state
            .violations
            .iter()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect();
        drop(state);

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let violation = state
            .violations
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("violation {}", id)))?;
        violation.active = false;
        Ok(())
    }

    async fn deactivate_all_for(&self, user_id: i64, chat_id: i64) -> Result<usize, StorageError> {
        let mut state = self.state.write().await;
        let mut flipped = 0;
        for violation in state
            .violations
            .iter_mut()
            .filter(|v| v.active && v.user_id == user_id && v.chat_id == chat_id)
        {
            violation.active = false;
            flipped += 1;
        }
        Ok(flipped)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<Vec<Violation>, StorageError> {
        let mut state = self.state.write().await;
        let mut expired = Vec::new();
        for violation in state.violations.iter_mut().filter(|v| {
            v.active
                && v.kind == ViolationKind::TempBan
                && v.expires_at.map_or(false, |expiry| expiry <= now)
        }) {
            violation.active = false;
            expired.push(violation.clone());
        }
        Ok(expired)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn resolve_or_create(
        &self,
        chat_user_id: i64,
        username: Option<&str>,
        first_name: &str,
    ) -> Result<UserRecord, StorageError> {
        let mut state = self.state.write().await;
        let username = username.filter(|u| !u.is_empty()).map(str::to_string);

        if let Some(existing) = state.users.values_mut().find(|u| u.chat_user_id == chat_user_id) {
            existing.username = username;
            existing.first_name = first_name.to_string();
            return Ok(existing.clone());
        }

        state.next_user_id += 1;
        let user = UserRecord {
            id: state.next_user_id,
            chat_user_id,
            username,
            first_name: first_name.to_string(),
            language_code: DEFAULT_LANGUAGE.to_string(),
            plan: SubscriptionPlan::Free,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        info!("Provisioned user {} for chat account {}", user.id, chat_user_id);
        Ok(user)
    }

    async fn find_by_chat_user_id(&self, chat_user_id: i64) -> Result<Option<UserRecord>, StorageError> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.chat_user_id == chat_user_id).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StorageError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }
}
