use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::info;

/// Delivers one message to one chat. No batching, retry or backoff happens here;
/// callers fanning out to many recipients isolate each failure themselves.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str, disable_link_preview: bool) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str, disable_link_preview: bool) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(disable_link_preview)
            .await
            .with_context(|| format!("send message to {chat_id} failed"))?;
        info!(chat_id, answer = text, "<<< sent message");
        Ok(())
    }
}
