// src/bot/rules.rs - Rule lookups and the storage failure policy

use log::{debug, error, warn};
use regex::RegexBuilder;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::store::RuleStore;
use crate::types::{MatchMode, ModerationSettings};

/// What happens to an evaluation when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Substitute a permissive fallback and keep evaluating
    FailOpen,
    /// Abort the evaluation
    FailClosed,
    /// Side effect already decided; log and move on
    LogAndContinue,
}

/// Steps of a message evaluation that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationStep {
    ForbiddenWordLookup,
    SettingsLookup,
    SenderLookup,
    SpamWindowCount,
    ActiveViolationCount,
    UserProvisioning,
    LedgerAppend,
    Enforcement,
    Notification,
}

impl ModerationStep {
    pub const fn policy(self) -> FailurePolicy {
        match self {
            ModerationStep::ForbiddenWordLookup
            | ModerationStep::SettingsLookup
            | ModerationStep::SenderLookup
            | ModerationStep::SpamWindowCount
            | ModerationStep::ActiveViolationCount => FailurePolicy::FailOpen,
            ModerationStep::UserProvisioning | ModerationStep::LedgerAppend => FailurePolicy::FailClosed,
            ModerationStep::Enforcement | ModerationStep::Notification => FailurePolicy::LogAndContinue,
        }
    }

    /// Resolve the result of a step that does not abort, using `fallback` on error
    pub fn degrade<T, E: Display>(self, result: Result<T, E>, fallback: impl FnOnce() -> T) -> T {
        debug_assert!(self.policy() != FailurePolicy::FailClosed, "{:?} must not degrade", self);
        match result {
            Ok(value) => value,
            Err(e) => {
                match self.policy() {
                    FailurePolicy::LogAndContinue => error!("{:?} failed: {}", self, e),
                    _ => warn!("{:?} failed, continuing with fallback: {}", self, e),
                }
                fallback()
            }
        }
    }

    /// Pass through the result of a step that aborts the evaluation on error
    pub fn require<T, E: Display>(self, result: Result<T, E>) -> Result<T, E> {
        debug_assert!(self.policy() == FailurePolicy::FailClosed, "{:?} must not abort", self);
        result.map_err(|e| {
            error!("{:?} failed, aborting evaluation: {}", self, e);
            e
        })
    }
}

/// Read side of the rule store with fail-open semantics
pub struct RuleReader {
    store: Arc<dyn RuleStore>,
    defaults: Arc<RwLock<ModerationSettings>>,
    match_mode: Arc<RwLock<MatchMode>>,
}

impl RuleReader {
    pub fn new(store: Arc<dyn RuleStore>, defaults: ModerationSettings, match_mode: MatchMode) -> Self {
        Self {
            store,
            defaults: Arc::new(RwLock::new(defaults)),
            match_mode: Arc::new(RwLock::new(match_mode)),
        }
    }

    pub async fn defaults(&self) -> ModerationSettings {
        self.defaults.read().await.clone()
    }

    pub async fn set_defaults(&self, defaults: ModerationSettings) {
        *self.defaults.write().await = defaults;
    }

    pub async fn set_match_mode(&self, match_mode: MatchMode) {
        *self.match_mode.write().await = match_mode;
    }

    /// Active words, or none when the store is unavailable
    pub async fn active_forbidden_words(&self) -> Vec<String> {
        ModerationStep::ForbiddenWordLookup.degrade(self.store.active_forbidden_words().await, Vec::new)
    }

    /// Effective settings for the chat: the stored row, or the injected defaults
    pub async fn settings_for(&self, chat_id: i64) -> ModerationSettings {
        let stored = ModerationStep::SettingsLookup.degrade(self.store.settings_for(chat_id).await, || None);

        match stored {
            Some(settings) => match settings.validate() {
                Ok(()) => settings,
                Err(e) => {
                    warn!("Ignoring invalid moderation settings for chat {}: {}", chat_id, e);
                    self.defaults().await
                }
            },
            None => self.defaults().await,
        }
    }

    /// First active forbidden word contained in `text`
    pub async fn find_forbidden_word(&self, text: &str) -> Option<String> {
        if text.is_empty() {
            return None;
        }

        let words = self.active_forbidden_words().await;
        let match_mode = *self.match_mode.read().await;
        let found = find_match(text, &words, match_mode);
        if let Some(ref word) = found {
            debug!("Forbidden word '{}' matched", word);
        }
        found
    }
}

/// Case-insensitive search for the first word from `words` present in `text`
pub fn find_match(text: &str, words: &[String], match_mode: MatchMode) -> Option<String> {
    let lowered = text.to_lowercase();

    words
        .iter()
        .map(|word| word.trim().to_lowercase())
        .filter(|word| !word.is_empty())
        .find(|word| match match_mode {
            MatchMode::Substring => lowered.contains(word.as_str()),
            MatchMode::WholeWord => is_whole_word_match(&lowered, word),
        })
}

fn is_whole_word_match(text: &str, word: &str) -> bool {
    let pattern = format!(r"(?:^|\W){}(?:\W|$)", regex::escape(word));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(regex) => regex.is_match(text),
        Err(e) => {
            warn!("Could not build matcher for forbidden word '{}': {}", word, e);
            text.contains(word)
        }
    }
}
