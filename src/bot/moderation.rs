// src/bot/moderation.rs - Moderation engine: classification, escalation and enforcement

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::bot::escalation::{decide_tier, derive_state, expiry_for};
use crate::bot::notifications::{ModerationNotice, NotificationEmitter};
use crate::bot::rules::{ModerationStep, RuleReader};
use crate::bot::spam::SpamRateDetector;
use crate::platforms::{BanUntil, EnforcementGateway};
use crate::store::{Stores, UserDirectory, ViolationLedger};
use crate::types::{
    ChatMessage, ConcurrencyStrategy, MatchMode, ModerationError, ModerationSettings,
    ModerationState, NewViolation, SpamSettings, UserRecord, ViolationCategory, ViolationKind,
};

/// Lock registry size above which idle entries are dropped
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Tunables injected into the engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Settings used for chats without a stored row
    pub defaults: ModerationSettings,
    pub spam: SpamSettings,
    pub match_mode: MatchMode,
    pub concurrency: ConcurrencyStrategy,
    pub max_reason_length: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            defaults: ModerationSettings::default(),
            spam: SpamSettings::default(),
            match_mode: MatchMode::default(),
            concurrency: ConcurrencyStrategy::default(),
            max_reason_length: 200,
        }
    }
}

/// Which best-effort side effects went through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforcementReport {
    pub ban_issued: bool,
    pub message_deleted: bool,
    pub notification_sent: bool,
}

/// Result of an evaluation that recorded a violation
#[derive(Debug, Clone, Serialize)]
pub struct ModerationOutcome {
    pub violation_id: Uuid,
    pub category: ViolationCategory,
    pub kind: ViolationKind,
    /// Active violations for the pair including this one
    pub violation_number: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserRecord,
    pub report: EnforcementReport,
}

/// Per-(user, chat) async locks serializing count + append
#[derive(Default)]
struct EvaluationLocks {
    locks: Mutex<HashMap<(i64, i64), Arc<Mutex<()>>>>,
}

impl EvaluationLocks {
    async fn acquire(&self, key: (i64, i64)) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                // Only the registry holds idle entries
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.lock_owned().await
    }
}

pub struct ModerationEngine {
    rules: RuleReader,
    spam: SpamRateDetector,
    ledger: Arc<dyn ViolationLedger>,
    users: Arc<dyn UserDirectory>,
    gateway: Arc<dyn EnforcementGateway>,
    notifier: NotificationEmitter,
    concurrency: ConcurrencyStrategy,
    max_reason_length: usize,
    locks: EvaluationLocks,
}

impl ModerationEngine {
    pub fn new(stores: Stores, gateway: Arc<dyn EnforcementGateway>, options: EngineOptions) -> Self {
        info!(
            "Moderation engine using {:?} concurrency, {:?} matching, spam limit {} per {}s",
            options.concurrency, options.match_mode, options.spam.max_events, options.spam.window_seconds
        );

        Self {
            rules: RuleReader::new(stores.rules, options.defaults, options.match_mode),
            spam: SpamRateDetector::new(stores.ledger.clone(), options.spam),
            ledger: stores.ledger,
            users: stores.users,
            notifier: NotificationEmitter::new(gateway.clone()),
            gateway,
            concurrency: options.concurrency,
            max_reason_length: options.max_reason_length,
            locks: EvaluationLocks::default(),
        }
    }

    pub fn rules(&self) -> &RuleReader {
        &self.rules
    }

    pub fn spam_detector(&self) -> &SpamRateDetector {
        &self.spam
    }

    pub fn ledger(&self) -> Arc<dyn ViolationLedger> {
        self.ledger.clone()
    }

    pub fn users(&self) -> Arc<dyn UserDirectory> {
        self.users.clone()
    }

    pub fn gateway(&self) -> Arc<dyn EnforcementGateway> {
        self.gateway.clone()
    }

    /// Apply reloaded options; concurrency strategy and reason length are fixed at startup
    pub async fn apply_options(&self, options: &EngineOptions) {
        self.rules.set_defaults(options.defaults.clone()).await;
        self.rules.set_match_mode(options.match_mode).await;
        self.spam.set_settings(options.spam.clone()).await;
        if options.concurrency != self.concurrency {
            warn!("Concurrency strategy changes take effect after restart");
        }
        info!("Moderation options reloaded");
    }

    pub async fn evaluate(&self, message: &ChatMessage) -> Result<Option<ModerationOutcome>, ModerationError> {
        self.evaluate_at(message, Utc::now()).await
    }

    /// Evaluate one inbound message at time `now`.
    ///
    /// Returns `Ok(None)` when the message is clean or comes from a private chat.
    /// Only sender provisioning and the ledger append abort the evaluation;
    /// enforcement and notification failures are logged and reported in the outcome.
    pub async fn evaluate_at(
        &self,
        message: &ChatMessage,
        now: DateTime<Utc>,
    ) -> Result<Option<ModerationOutcome>, ModerationError> {
        if !message.chat_type.is_moderated() {
            debug!("Skipping private message {} from {}", message.message_id, message.sender_id);
            return Ok(None);
        }

        let guard = match self.concurrency {
            ConcurrencyStrategy::PerUserLock => Some(self.locks.acquire((message.sender_id, message.chat_id)).await),
            ConcurrencyStrategy::Unsynchronized => None,
        };

        let category = match self.classify(message, now).await {
            Some(category) => category,
            None => return Ok(None),
        };

        info!(
            "Message {} from {} in chat {} flagged as {}",
            message.message_id,
            message.display_name(),
            message.chat_id,
            category.as_str()
        );

        let user = ModerationStep::UserProvisioning
            .require(
                self.users
                    .resolve_or_create(message.sender_id, message.sender_username.as_deref(), &message.sender_first_name)
                    .await,
            )
            .map_err(ModerationError::UserProvisioning)?;

        let settings = self.rules.settings_for(message.chat_id).await;
        let active_count = ModerationStep::ActiveViolationCount
            .degrade(self.ledger.count_active(user.id, message.chat_id).await, || 0);

        let kind = decide_tier(active_count, &settings);
        let expires_at = expiry_for(kind, &settings, now).map_err(ModerationError::InvalidSettings)?;
        let reason = bounded_reason(category.reason(), self.max_reason_length);

        let violation_id = ModerationStep::LedgerAppend
            .require(
                self.ledger
                    .append(NewViolation {
                        user_id: user.id,
                        chat_id: message.chat_id,
                        kind,
                        reason: reason.clone(),
                        source_text: (!message.content.is_empty()).then(|| message.content.clone()),
                        created_at: now,
                        expires_at,
                    })
                    .await,
            )
            .map_err(ModerationError::Ledger)?;
        drop(guard);

        let violation_number = active_count + 1;
        info!(
            "Recorded {} #{} for user {} in chat {}",
            kind, violation_number, user.id, message.chat_id
        );

        let mut report = self.enforce(message, kind, expires_at, &settings).await;

        let notice = ModerationNotice {
            user: &user,
            kind,
            reason: &reason,
            violation_number,
            settings: &settings,
        };
        report.notification_sent = ModerationStep::Notification.degrade(
            self.notifier
                .emit(message.chat_id, &notice)
                .await
                .map(|_| true)
                .map_err(|e| format!("notify chat {} about user {}: {}", message.chat_id, user.id, e)),
            || false,
        );

        Ok(Some(ModerationOutcome {
            violation_id,
            category,
            kind,
            violation_number,
            expires_at,
            user,
            report,
        }))
    }

    /// Forbidden words first, then the spam window
    pub async fn classify(&self, message: &ChatMessage, now: DateTime<Utc>) -> Option<ViolationCategory> {
        if self.rules.find_forbidden_word(&message.content).await.is_some() {
            return Some(ViolationCategory::ForbiddenWords);
        }

        // Unknown senders have no ledger rows and cannot be spamming
        let sender = ModerationStep::SenderLookup
            .degrade(self.users.find_by_chat_user_id(message.sender_id).await, || None)?;

        if self.spam.is_spamming_at(sender.id, message.chat_id, now).await {
            Some(ViolationCategory::Spam)
        } else {
            None
        }
    }

    async fn enforce(
        &self,
        message: &ChatMessage,
        kind: ViolationKind,
        expires_at: Option<DateTime<Utc>>,
        settings: &ModerationSettings,
    ) -> EnforcementReport {
        let mut report = EnforcementReport::default();
        if !kind.is_ban() {
            return report;
        }

        if !settings.auto_ban_enabled {
            info!(
                "Auto-ban disabled in chat {}; {} for {} recorded without enforcement",
                message.chat_id, kind, message.sender_id
            );
            return report;
        }

        let until = BanUntil::from_expiry(expires_at);
        report.ban_issued = ModerationStep::Enforcement.degrade(
            self.gateway
                .ban_member(message.chat_id, message.sender_id, until)
                .await
                .map(|_| true)
                .map_err(|e| format!("ban user {} in chat {}: {}", message.sender_id, message.chat_id, e)),
            || false,
        );
        report.message_deleted = ModerationStep::Enforcement.degrade(
            self.gateway
                .delete_message(message.chat_id, message.message_id)
                .await
                .map(|_| true)
                .map_err(|e| format!("delete message {} in chat {}: {}", message.message_id, message.chat_id, e)),
            || false,
        );
        report
    }

    /// Derived state for a chat account in a chat
    pub async fn state_for(&self, chat_id: i64, chat_user_id: i64) -> ModerationState {
        let user = ModerationStep::SenderLookup.degrade(self.users.find_by_chat_user_id(chat_user_id).await, || None);
        let Some(user) = user else {
            return ModerationState::Clean;
        };

        let settings = self.rules.settings_for(chat_id).await;
        let count = ModerationStep::ActiveViolationCount.degrade(self.ledger.count_active(user.id, chat_id).await, || 0);
        derive_state(count, &settings)
    }

    /// Deactivate every violation of a chat account in a chat; the ban itself is left alone
    pub async fn clear_violations(&self, chat_id: i64, chat_user_id: i64) -> Result<usize, ModerationError> {
        let user = self
            .users
            .find_by_chat_user_id(chat_user_id)
            .await
            .map_err(ModerationError::Storage)?;

        match user {
            Some(user) => {
                let cleared = self
                    .ledger
                    .deactivate_all_for(user.id, chat_id)
                    .await
                    .map_err(ModerationError::Storage)?;
                info!("Cleared {} violations for user {} in chat {}", cleared, user.id, chat_id);
                Ok(cleared)
            }
            None => Ok(0),
        }
    }

    /// Administrative unban: lift the platform ban, then clear the ledger.
    ///
    /// When the platform refuses the unban the ledger is left untouched.
    pub async fn lift_ban(&self, chat_id: i64, chat_user_id: i64) -> Result<usize, ModerationError> {
        self.gateway
            .unban_member(chat_id, chat_user_id)
            .await
            .map_err(ModerationError::Transport)?;
        self.clear_violations(chat_id, chat_user_id).await
    }

    /// Administrative ban issued outside the escalation flow; the ledger is not touched
    pub async fn impose_ban(&self, chat_id: i64, chat_user_id: i64, until: BanUntil) -> Result<(), ModerationError> {
        self.gateway
            .ban_member(chat_id, chat_user_id, until)
            .await
            .map_err(ModerationError::Transport)?;
        info!("Banned user {} in chat {} until {:?}", chat_user_id, chat_id, until);
        Ok(())
    }
}

/// Cut `reason` to at most `max_chars` characters
fn bounded_reason(reason: &str, max_chars: usize) -> String {
    match reason.char_indices().nth(max_chars) {
        Some((end, _)) => reason[..end].to_string(),
        None => reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::console::ConsoleGateway;
    use crate::store::{MemoryStore, RuleStore};
    use crate::types::ChatType;

    fn message(content: &str, chat_type: ChatType) -> ChatMessage {
        ChatMessage {
            chat_id: -100,
            chat_type,
            message_id: 1,
            sender_id: 42,
            sender_username: Some("alice".to_string()),
            sender_first_name: "Alice".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    async fn engine_with_words(words: &[&str]) -> (ModerationEngine, MemoryStore) {
        let store = MemoryStore::new();
        for word in words {
            store.add_forbidden_word(word).await.unwrap();
        }
        let engine = ModerationEngine::new(
            Stores::from_memory(store.clone()),
            Arc::new(ConsoleGateway::new()),
            EngineOptions::default(),
        );
        (engine, store)
    }

    #[test]
    fn test_bounded_reason_respects_char_boundaries() {
        assert_eq!(bounded_reason("Spam messages", 4), "Spam");
        assert_eq!(bounded_reason("Спам", 2), "Сп");
        assert_eq!(bounded_reason("short", 200), "short");
    }

    #[tokio::test]
    async fn test_clean_message_records_nothing() {
        let (engine, store) = engine_with_words(&["casino"]).await;
        let outcome = engine.evaluate(&message("hello everyone", ChatType::Group)).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(store.violation_count().await, 0);
    }

    #[tokio::test]
    async fn test_private_messages_are_ignored() {
        let (engine, store) = engine_with_words(&["casino"]).await;
        let outcome = engine.evaluate(&message("best casino deals", ChatType::Private)).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(store.violation_count().await, 0);
        assert!(store.find_by_chat_user_id(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_violation_is_a_warning() {
        let (engine, _store) = engine_with_words(&["casino"]).await;
        let outcome = engine
            .evaluate(&message("best CASINO deals", ChatType::Supergroup))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.category, ViolationCategory::ForbiddenWords);
        assert_eq!(outcome.kind, ViolationKind::Warning);
        assert_eq!(outcome.violation_number, 1);
        assert!(outcome.expires_at.is_none());
        assert!(!outcome.report.ban_issued);
        assert!(!outcome.report.message_deleted);
        assert!(outcome.report.notification_sent);
        assert_eq!(engine.state_for(-100, 42).await, ModerationState::Warned);
    }

    #[tokio::test]
    async fn test_lift_ban_resets_state() {
        let (engine, _store) = engine_with_words(&["casino"]).await;
        for _ in 0..3 {
            engine.evaluate(&message("casino", ChatType::Group)).await.unwrap();
        }
        assert_eq!(engine.state_for(-100, 42).await, ModerationState::TempBanned);

        assert_eq!(engine.lift_ban(-100, 42).await.unwrap(), 3);
        assert_eq!(engine.state_for(-100, 42).await, ModerationState::Clean);
        assert_eq!(engine.lift_ban(-100, 7).await.unwrap(), 0);
    }
}
