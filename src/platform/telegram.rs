use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, CallbackQueryId, ChatAction, InlineKeyboardButton, InlineKeyboardMarkup,
    MessageId, ReactionType,
};

use crate::platform::ChoiceButton;

/// Outbound calls the bridge makes against the chat platform. Every call is a
/// one-shot request; callers decide whether a failure matters.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    async fn send_reaction(&self, chat_id: i64, message_id: i32, emoji: &str) -> Result<()>;

    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    async fn send_choices(&self, chat_id: i64, text: &str, choices: &[ChoiceButton])
        -> Result<()>;

    async fn answer_callback(&self, query_id: &str) -> Result<()>;
}

/// Commands shown in the chat client's menu.
pub const BOT_COMMANDS: [(&str, &str); 6] = [
    ("clear", "Clear conversation"),
    ("resume", "Resume session (shows picker)"),
    ("continue_", "Continue most recent session"),
    ("loop", "Ralph Loop: /loop <prompt>"),
    ("stop", "Interrupt Claude (Escape)"),
    ("status", "Check tmux status"),
];

/// `ChatApi` backed by the Telegram Bot API.
pub struct TelegramApi {
    bot: Bot,
    token: String,
    timeout: Duration,
}

impl TelegramApi {
    pub fn new(token: &str, timeout: Duration) -> Self {
        Self {
            bot: Bot::new(token),
            token: token.to_string(),
            timeout,
        }
    }

    /// Register the command menu.
    pub async fn register_commands(&self) -> Result<()> {
        let commands: Vec<BotCommand> = BOT_COMMANDS
            .iter()
            .map(|(name, description)| BotCommand::new(*name, *description))
            .collect();
        self.call("setMyCommands", self.bot.set_my_commands(commands).send())
            .await
    }

    async fn call<F, T>(&self, method: &str, request: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<T, teloxide::RequestError>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(anyhow::anyhow!(
                "Telegram API error ({}): {}",
                method,
                redact_token(&e.to_string(), &self.token)
            )),
            Err(_) => Err(anyhow::anyhow!(
                "Telegram API timeout ({}) after {:?}",
                method,
                self.timeout
            )),
        }
    }
}

#[async_trait]
impl ChatApi for TelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call(
            "sendMessage",
            self.bot.send_message(ChatId(chat_id), text).send(),
        )
        .await
    }

    async fn send_reaction(&self, chat_id: i64, message_id: i32, emoji: &str) -> Result<()> {
        let reaction = vec![ReactionType::Emoji {
            emoji: emoji.to_string(),
        }];
        self.call(
            "setMessageReaction",
            self.bot
                .set_message_reaction(ChatId(chat_id), MessageId(message_id))
                .reaction(reaction)
                .send(),
        )
        .await
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.call(
            "sendChatAction",
            self.bot
                .send_chat_action(ChatId(chat_id), ChatAction::Typing)
                .send(),
        )
        .await
    }

    async fn send_choices(
        &self,
        chat_id: i64,
        text: &str,
        choices: &[ChoiceButton],
    ) -> Result<()> {
        let rows: Vec<Vec<InlineKeyboardButton>> = choices
            .iter()
            .map(|c| vec![InlineKeyboardButton::callback(c.label.clone(), c.data.clone())])
            .collect();
        self.call(
            "sendMessage",
            self.bot
                .send_message(ChatId(chat_id), text)
                .reply_markup(InlineKeyboardMarkup::new(rows))
                .send(),
        )
        .await
        .context("Failed to send session chooser")
    }

    async fn answer_callback(&self, query_id: &str) -> Result<()> {
        self.call(
            "answerCallbackQuery",
            self.bot
                .answer_callback_query(CallbackQueryId(query_id.to_string()))
                .send(),
        )
        .await
    }
}

/// Strip the bot token from an error string before it reaches the logs.
pub fn redact_token(message: &str, token: &str) -> String {
    if token.is_empty() {
        return message.to_string();
    }
    message.replace(token, "<BOT_TOKEN>")
}
