//! Shared doubles for moderation integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chatwarden::bot::moderation::{EngineOptions, ModerationEngine};
use chatwarden::platforms::{BanUntil, EnforcementGateway};
use chatwarden::store::{MemoryStore, Stores, UserDirectory, ViolationFilter, ViolationLedger};
use chatwarden::types::{
    ChatMessage, ChatType, EnforcementError, NewViolation, StorageError, UserRecord, Violation,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const CHAT: i64 = -1001;
pub const SENDER: i64 = 4242;

/// One call made against the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Ban { chat_id: i64, user_id: i64, until: BanUntil },
    Unban { chat_id: i64, user_id: i64 },
    Delete { chat_id: i64, message_id: i64 },
    Send { chat_id: i64, text: String, formatted: bool },
}

/// Gateway that records every call and can be told to fail
#[derive(Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    pub fail_bans: AtomicBool,
    pub fail_unbans: AtomicBool,
    pub fail_sends: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bans(&self) -> Vec<BanUntil> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Ban { until, .. } => Some(until),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Delete { .. }))
            .count()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl EnforcementGateway for RecordingGateway {
    async fn ban_member(&self, chat_id: i64, user_id: i64, until: BanUntil) -> Result<(), EnforcementError> {
        self.record(GatewayCall::Ban { chat_id, user_id, until });
        if self.fail_bans.load(Ordering::SeqCst) {
            return Err(EnforcementError::Rejected {
                operation: "ban_member",
                reason: "not enough rights".to_string(),
            });
        }
        Ok(())
    }

    async fn unban_member(&self, chat_id: i64, user_id: i64) -> Result<(), EnforcementError> {
        self.record(GatewayCall::Unban { chat_id, user_id });
        if self.fail_unbans.load(Ordering::SeqCst) {
            return Err(EnforcementError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), EnforcementError> {
        self.record(GatewayCall::Delete { chat_id, message_id });
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str, formatted: bool) -> Result<(), EnforcementError> {
        self.record(GatewayCall::Send {
            chat_id,
            text: text.to_string(),
            formatted,
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(EnforcementError::Transport("connection reset".to_string()));
        }
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "recording"
    }
}

/// Ledger and user directory over a `MemoryStore` with switchable failures
pub struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_append: AtomicBool,
    pub fail_counts: AtomicBool,
    pub fail_users: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_append: AtomicBool::new(false),
            fail_counts: AtomicBool::new(false),
            fail_users: AtomicBool::new(false),
        })
    }

    fn check(flag: &AtomicBool) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("database is down".to_string()));
        }
        Ok(())
    }

    pub fn stores(self: &Arc<Self>) -> Stores {
        Stores {
            rules: Arc::new(self.inner.clone()),
            ledger: self.clone(),
            users: self.clone(),
        }
    }
}

#[async_trait]
impl ViolationLedger for FaultyStore {
    async fn count_active(&self, user_id: i64, chat_id: i64) -> Result<u32, StorageError> {
        Self::check(&self.fail_counts)?;
        self.inner.count_active(user_id, chat_id).await
    }

    async fn count_active_since(
        &self,
        user_id: i64,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        Self::check(&self.fail_counts)?;
        self.inner.count_active_since(user_id, chat_id, since).await
    }

    async fn append(&self, violation: NewViolation) -> Result<Uuid, StorageError> {
        Self::check(&self.fail_append)?;
        self.inner.append(violation).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Violation>, StorageError> {
        self.inner.get(id).await
    }

    async fn query(&self, filter: &ViolationFilter) -> Result<Vec<Violation>, StorageError> {
        self.inner.query(filter).await
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StorageError> {
        self.inner.deactivate(id).await
    }

    async fn deactivate_all_for(&self, user_id: i64, chat_id: i64) -> Result<usize, StorageError> {
        self.inner.deactivate_all_for(user_id, chat_id).await
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<Vec<Violation>, StorageError> {
        self.inner.deactivate_expired(now).await
    }
}

#[async_trait]
impl UserDirectory for FaultyStore {
    async fn resolve_or_create(
        &self,
        chat_user_id: i64,
        username: Option<&str>,
        first_name: &str,
    ) -> Result<UserRecord, StorageError> {
        Self::check(&self.fail_users)?;
        self.inner.resolve_or_create(chat_user_id, username, first_name).await
    }

    async fn find_by_chat_user_id(&self, chat_user_id: i64) -> Result<Option<UserRecord>, StorageError> {
        Self::check(&self.fail_users)?;
        self.inner.find_by_chat_user_id(chat_user_id).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StorageError> {
        self.inner.find_by_id(id).await
    }
}

static NEXT_MESSAGE_ID: AtomicI64 = AtomicI64::new(1);

pub fn message_from(sender_id: i64, chat_id: i64, chat_type: ChatType, content: &str) -> ChatMessage {
    ChatMessage {
        chat_id,
        chat_type,
        message_id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::SeqCst),
        sender_id,
        sender_username: Some("mallory".to_string()),
        sender_first_name: "Mallory".to_string(),
        content: content.to_string(),
        timestamp: Utc::now(),
    }
}

pub fn group_message(content: &str) -> ChatMessage {
    message_from(SENDER, CHAT, ChatType::Supergroup, content)
}

pub async fn store_with_words(words: &[&str]) -> MemoryStore {
    use chatwarden::store::RuleStore;

    let store = MemoryStore::new();
    for word in words {
        store.add_forbidden_word(word).await.unwrap();
    }
    store
}

pub fn engine(store: &MemoryStore, gateway: Arc<RecordingGateway>, options: EngineOptions) -> ModerationEngine {
    ModerationEngine::new(Stores::from_memory(store.clone()), gateway, options)
}

/// Internal directory id of the default sender
pub async fn sender_record(store: &MemoryStore) -> UserRecord {
    store.find_by_chat_user_id(SENDER).await.unwrap().unwrap()
}
