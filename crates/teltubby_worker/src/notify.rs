//! Bot-API notifications from the worker.
//!
//! Completion and recovery messages go back through the regular bot token;
//! without one the worker just logs.

use teloxide::prelude::*;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Notifier {
    bot: Option<Bot>,
    admins: Vec<i64>,
}

impl Notifier {
    pub fn new(bot_token: &str, admins: Vec<i64>) -> Self {
        let bot = (!bot_token.is_empty()).then(|| Bot::new(bot_token));
        Self { bot, admins }
    }

    /// No-op notifier (logs only); used by tests and simulate setups.
    pub fn disabled() -> Self {
        Self {
            bot: None,
            admins: vec![],
        }
    }

    /// Send to one chat; delivery failures are logged, never fatal.
    pub async fn chat(&self, chat_id: i64, text: &str) {
        let Some(bot) = &self.bot else {
            info!("notification (no bot token) to {chat_id}: {text}");
            return;
        };
        if let Err(e) = bot.send_message(ChatId(chat_id), text).await {
            warn!("failed to notify chat {chat_id}: {e}");
        }
    }

    /// Broadcast to every whitelisted administrator.
    pub async fn admins(&self, text: &str) {
        if self.admins.is_empty() {
            info!("admin notification (no admins configured): {text}");
            return;
        }
        for admin in &self.admins {
            self.chat(*admin, text).await;
        }
    }
}
