//! Scoped typing indicator.
//!
//! Telegram's typing action expires after about five seconds, so a guard
//! task refreshes it while a batch is being processed. Dropping the guard
//! stops the refresh on every exit path, including cancellation.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;
use tokio::task::JoinHandle;

pub struct TypingGuard {
    task: JoinHandle<()>,
}

impl TypingGuard {
    pub fn start(bot: Bot, chat_id: ChatId) -> Self {
        let task = tokio::spawn(async move {
            loop {
                if bot.send_chat_action(chat_id, ChatAction::Typing).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        Self { task }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
