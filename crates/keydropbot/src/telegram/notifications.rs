//! Admin notifications and broadcast delivery

use std::time::Duration;

use async_trait::async_trait;
use keydropcore::dispense::{AuditEvent, AuditSink};
use teloxide::prelude::*;

/// Pause between broadcast messages, keeps us under Telegram's flood limits
const BROADCAST_PAUSE: Duration = Duration::from_millis(50);

/// Forwards every dispense to the admin chat.
#[derive(Clone)]
pub struct TelegramAuditSink {
    bot: Bot,
    admin_chat: ChatId,
}

impl TelegramAuditSink {
    pub fn new(bot: Bot, admin_id: i64) -> Self {
        Self {
            bot,
            admin_chat: ChatId(admin_id),
        }
    }
}

/// Chat text for one audit event.
pub fn audit_message(event: &AuditEvent) -> String {
    format!("📦 Lines dispensed\n\n{}", event.summary())
}

#[async_trait]
impl AuditSink for TelegramAuditSink {
    async fn record(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.bot.send_message(self.admin_chat, audit_message(event)).await?;
        Ok(())
    }
}

/// Tells the admin the bot is up. Failures are only logged.
pub async fn notify_admin_startup(bot: &Bot, admin_id: i64, summary: &str) {
    if admin_id == 0 {
        return;
    }
    let text = format!("✅ Bot started\n\n{}", summary);
    if let Err(e) = bot.send_message(ChatId(admin_id), text).await {
        log::warn!("Failed to send startup notification to admin {}: {}", admin_id, e);
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
}

impl std::fmt::Display for BroadcastReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Broadcast sent to {} user(s), {} failed.", self.sent, self.failed)
    }
}

/// Sends `text` to every recipient, one at a time.
pub async fn broadcast(bot: &Bot, recipients: &[i64], text: &str) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for &user_id in recipients {
        match bot.send_message(ChatId(user_id), text).await {
            Ok(_) => report.sent += 1,
            Err(e) => {
                log::warn!("Broadcast to {} failed: {}", user_id, e);
                report.failed += 1;
            }
        }
        tokio::time::sleep(BROADCAST_PAUSE).await;
    }
    log::info!("{}", report);
    report
}
