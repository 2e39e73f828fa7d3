// src/bot/escalation.rs - Escalation state machine derived from active violation counts

use chrono::{DateTime, Utc};

use crate::types::{ModerationSettings, ModerationState, SettingsError, ViolationKind, MAX_TEMP_BAN_HOURS};

/// Derive the moderation state of a (user, chat) pair from its active violation count
pub fn derive_state(active_count: u32, settings: &ModerationSettings) -> ModerationState {
    if active_count == 0 {
        ModerationState::Clean
    } else if active_count >= settings.permanent_ban_threshold {
        ModerationState::PermaBanned
    } else if active_count >= settings.warning_threshold {
        ModerationState::TempBanned
    } else {
        ModerationState::Warned
    }
}

/// Choose the tier for a new violation given the active count before it is recorded.
///
/// The decision is made on the count after this violation, so the (count + 1)-th
/// violation is the one that crosses a threshold. First match wins.
pub fn decide_tier(active_count: u32, settings: &ModerationSettings) -> ViolationKind {
    let after = active_count.saturating_add(1);
    if after >= settings.permanent_ban_threshold {
        ViolationKind::PermanentBan
    } else if after >= settings.warning_threshold {
        ViolationKind::TempBan
    } else {
        ViolationKind::Warning
    }
}

/// Expiry for a violation of `kind` created at `now`; only temporary bans expire.
///
/// Fails when the configured duration runs past the representable calendar.
pub fn expiry_for(
    kind: ViolationKind,
    settings: &ModerationSettings,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SettingsError> {
    match kind {
        ViolationKind::TempBan => now
            .checked_add_signed(settings.temp_ban_duration())
            .map(Some)
            .ok_or(SettingsError::DurationTooLong {
                hours: settings.temp_ban_duration_hours,
                max: MAX_TEMP_BAN_HOURS,
            }),
        ViolationKind::Warning | ViolationKind::PermanentBan => Ok(None),
    }
}
