// src/bot/notifications.rs - Human-readable moderation notices

use log::debug;
use std::sync::Arc;

use crate::platforms::EnforcementGateway;
use crate::types::{EnforcementError, ModerationSettings, UserRecord, ViolationKind};

/// Everything a notice needs to describe one moderation decision
#[derive(Debug, Clone)]
pub struct ModerationNotice<'a> {
    pub user: &'a UserRecord,
    pub kind: ViolationKind,
    pub reason: &'a str,
    /// Position of this violation among the user's active violations
    pub violation_number: u32,
    pub settings: &'a ModerationSettings,
}

/// Escape characters that carry meaning in chat Markdown
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `@username` when the user has one, otherwise a profile link on the first name
pub fn user_mention(user: &UserRecord) -> String {
    match user.username.as_deref() {
        Some(username) if !username.is_empty() => format!("@{}", escape_markdown(username)),
        _ => format!("[{}](tg://user?id={})", escape_markdown(&user.first_name), user.chat_user_id),
    }
}

pub fn format_notice(notice: &ModerationNotice<'_>) -> String {
    let mention = user_mention(notice.user);
    let reason = escape_markdown(notice.reason);

    match notice.kind {
        ViolationKind::Warning => format!(
            "⚠️ *Warning*\n\n👤 User: {}\n🔢 Violation: {}\n📝 Reason: {}\n\n💡 A temporary ban follows at {} violations",
            mention, notice.violation_number, reason, notice.settings.warning_threshold
        ),
        ViolationKind::TempBan => format!(
            "🚫 *Temporary ban*\n\n👤 User: {}\n🔢 Violation: {}\n📝 Reason: {}\n⏰ Duration: {} hours",
            mention, notice.violation_number, reason, notice.settings.temp_ban_duration_hours
        ),
        ViolationKind::PermanentBan => format!(
            "🔒 *Permanent ban*\n\n👤 User: {}\n🔢 Violation: {}\n📝 Reason: {}\n⛔ The user is banned permanently",
            mention, notice.violation_number, reason
        ),
    }
}

/// Sends moderation notices back into the chat
pub struct NotificationEmitter {
    gateway: Arc<dyn EnforcementGateway>,
}

impl NotificationEmitter {
    pub fn new(gateway: Arc<dyn EnforcementGateway>) -> Self {
        Self { gateway }
    }

    pub async fn emit(&self, chat_id: i64, notice: &ModerationNotice<'_>) -> Result<(), EnforcementError> {
        let text = format_notice(notice);
        self.gateway.send_message(chat_id, &text, true).await?;
        debug!("Sent {} notice for user {} to chat {}", notice.kind, notice.user.id, chat_id);
        Ok(())
    }
}
