//! In-memory doubles for the terminal and the chat platform.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::bridge::Bridge;
use crate::config::Config;
use crate::platform::telegram::ChatApi;
use crate::platform::{ChatKind, ChoiceButton, IncomingUpdate, UpdateContent};
use crate::terminal::{Terminal, TmuxError};

pub struct FakeTerminal {
    present: AtomicBool,
    sent: Mutex<Vec<String>>,
    interrupts: AtomicUsize,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self {
            present: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
        }
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), TmuxError> {
        if self.present.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TmuxError::SessionNotFound("claude".to_string()))
        }
    }
}

#[async_trait]
impl Terminal for FakeTerminal {
    fn session_name(&self) -> &str {
        "claude"
    }

    async fn session_exists(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    async fn send_keys(&self, text: &str) -> Result<(), TmuxError> {
        self.check()?;
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), TmuxError> {
        self.check()?;
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    Message { chat_id: i64, text: String },
    Reaction { chat_id: i64, message_id: i32, emoji: String },
    Typing(i64),
    Choices { chat_id: i64, choices: Vec<ChoiceButton> },
    AnswerCallback(String),
}

#[derive(Default)]
pub struct RecordingChat {
    calls: Mutex<Vec<ChatCall>>,
    fail_reactions: AtomicBool,
}

impl RecordingChat {
    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_reactions(&self) {
        self.fail_reactions.store(true, Ordering::SeqCst);
    }

    /// Number of text messages containing `needle`.
    pub fn messages_containing(&self, needle: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ChatCall::Message { text, .. } if text.contains(needle)))
            .count()
    }

    fn record(&self, call: ChatCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatApi for RecordingChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.record(ChatCall::Message {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_reaction(&self, chat_id: i64, message_id: i32, emoji: &str) -> Result<()> {
        if self.fail_reactions.load(Ordering::SeqCst) {
            anyhow::bail!("reaction rejected");
        }
        self.record(ChatCall::Reaction {
            chat_id,
            message_id,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.record(ChatCall::Typing(chat_id));
        Ok(())
    }

    async fn send_choices(
        &self,
        chat_id: i64,
        _text: &str,
        choices: &[ChoiceButton],
    ) -> Result<()> {
        self.record(ChatCall::Choices {
            chat_id,
            choices: choices.to_vec(),
        });
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str) -> Result<()> {
        self.record(ChatCall::AnswerCallback(query_id.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub bridge: Arc<Bridge>,
    pub terminal: Arc<FakeTerminal>,
    pub chat: Arc<RecordingChat>,
    pub config: Config,
    _dir: tempfile::TempDir,
}

/// Config pointing every path into a fresh temp dir, with no delays and the
/// typing indicator off. DMs are allowed for user 42.
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.telegram.bot_token = "test-token".to_string();
    config.telegram.webhook_path = Some("test_webhook_path_12345".to_string());
    config.access.dm_allowed_user_id = Some(42);
    config.paths.pending_file = dir.join("telegram_pending");
    config.paths.history_file = dir.join("history.jsonl");
    config.paths.projects_dir = dir.join("projects");
    config.terminal.settle_delay_ms = 0;
    config.terminal.restart_delay_ms = 0;
    config.typing.interval_secs = 0;
    config
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with<F: FnOnce(&mut Config)>(customize: F) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    customize(&mut config);

    let terminal = Arc::new(FakeTerminal::new());
    let chat = Arc::new(RecordingChat::default());
    let bridge = Arc::new(Bridge::new(&config, terminal.clone(), chat.clone()));
    Harness {
        bridge,
        terminal,
        chat,
        config,
        _dir: dir,
    }
}

fn chat_id_for(kind: ChatKind, sender: u64) -> i64 {
    match kind {
        ChatKind::Private => sender as i64,
        ChatKind::Group => -100_123_456_789,
        ChatKind::Channel => -100_987_654_321,
    }
}

pub fn text_update(kind: ChatKind, sender: u64, text: &str) -> IncomingUpdate {
    IncomingUpdate {
        chat_id: chat_id_for(kind, sender),
        chat_kind: kind,
        sender_user_id: Some(sender),
        message_id: Some(100),
        content: UpdateContent::Text(text.to_string()),
    }
}

pub fn callback_update(kind: ChatKind, sender: u64, data: &str) -> IncomingUpdate {
    IncomingUpdate {
        chat_id: chat_id_for(kind, sender),
        chat_kind: kind,
        sender_user_id: Some(sender),
        message_id: Some(100),
        content: UpdateContent::Callback {
            query_id: "cb-1".to_string(),
            data: data.to_string(),
        },
    }
}
