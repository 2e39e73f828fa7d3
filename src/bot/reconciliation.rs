// src/bot/reconciliation.rs - Background sweep of expired temporary bans

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::store::ViolationLedger;
use crate::types::StorageError;

/// Deactivates temporary bans once their expiry has passed.
///
/// Expired bans stop counting toward escalation after a sweep, so this only
/// runs when explicitly enabled.
pub struct ExpiryReconciler {
    ledger: Arc<dyn ViolationLedger>,
    interval: Duration,
    shutdown_signal: Arc<AtomicBool>,
}

impl ExpiryReconciler {
    pub fn new(ledger: Arc<dyn ViolationLedger>, sweep_interval_seconds: u64) -> Self {
        Self {
            ledger,
            interval: Duration::from_secs(sweep_interval_seconds.max(1)),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one sweep, returning the number of bans deactivated
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let expired = self.ledger.deactivate_expired(now).await?;
        for violation in &expired {
            debug!(
                "Temporary ban {} for user {} in chat {} expired",
                violation.id, violation.user_id, violation.chat_id
            );
        }
        if !expired.is_empty() {
            info!("Deactivated {} expired temporary bans", expired.len());
        }
        Ok(expired.len())
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);

        tokio::spawn(async move {
            info!("Expiry reconciler started ({}s interval)", reconciler.interval.as_secs());
            let mut ticker = tokio::time::interval(reconciler.interval);

            loop {
                ticker.tick().await;
                if reconciler.shutdown_signal.load(Ordering::Relaxed) {
                    info!("Expiry reconciler received shutdown signal");
                    break;
                }

                if let Err(e) = reconciler.sweep(Utc::now()).await {
                    error!("Expiry sweep failed: {}", e);
                }
            }
        })
    }

    pub fn stop(&self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }
}
