// src/bot/spam.rs - Spam rate detection over the violation ledger

use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::bot::rules::ModerationStep;
use crate::store::ViolationLedger;
use crate::types::{SpamSettings, StorageError};

/// Flags rapid repeat offenders in a trailing time window.
///
/// The signal is the violation ledger itself: every violation recorded for the
/// pair, whatever its kind, counts as an event. Repeated infractions in a short
/// window compound into a spam classification. A first burst of otherwise clean
/// messages never trips the detector, since nothing has been recorded yet.
pub struct SpamRateDetector {
    ledger: Arc<dyn ViolationLedger>,
    settings: Arc<RwLock<SpamSettings>>,
}

impl SpamRateDetector {
    pub fn new(ledger: Arc<dyn ViolationLedger>, settings: SpamSettings) -> Self {
        Self {
            ledger,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub async fn settings(&self) -> SpamSettings {
        self.settings.read().await.clone()
    }

    pub async fn set_settings(&self, settings: SpamSettings) {
        *self.settings.write().await = settings;
    }

    /// Events for the pair inside the window ending at `now`
    pub async fn recent_events(&self, user_id: i64, chat_id: i64, now: DateTime<Utc>) -> Result<u32, StorageError> {
        let since = now - self.settings.read().await.window();
        self.ledger.count_active_since(user_id, chat_id, since).await
    }

    pub async fn is_spamming(&self, user_id: i64, chat_id: i64) -> bool {
        self.is_spamming_at(user_id, chat_id, Utc::now()).await
    }

    /// True when strictly more than `max_events` fall in the window; storage errors read as false
    pub async fn is_spamming_at(&self, user_id: i64, chat_id: i64, now: DateTime<Utc>) -> bool {
        let events = ModerationStep::SpamWindowCount.degrade(self.recent_events(user_id, chat_id, now).await, || 0);
        let max_events = self.settings.read().await.max_events;

        debug!("User {} has {} recent events in chat {} (limit {})", user_id, events, chat_id, max_events);
        events > max_events
    }
}
