use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::access::AccessPolicy;
use crate::commands::{CallbackAction, Command};
use crate::config::{Config, TypingConfig};
use crate::pending::{PendingCoordinator, PendingError};
use crate::platform::telegram::ChatApi;
use crate::platform::{IncomingUpdate, UpdateContent};
use crate::ralph::{LoopError, RalphLoop};
use crate::sessions::SessionIndex;
use crate::terminal::{Terminal, TmuxError};
use crate::typing::spawn_typing_indicator;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Terminal(#[from] TmuxError),
    #[error(transparent)]
    Pending(#[from] PendingError),
}

impl DispatchError {
    /// Short text for the best-effort error reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            DispatchError::Terminal(TmuxError::SessionNotFound(_)) => "tmux not found",
            DispatchError::Terminal(_) => "Failed to reach terminal",
            DispatchError::Pending(_) => "Failed to record pending reply",
        }
    }
}

/// What handling an update ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Denied,
    Replied,
    Injected,
    Cleared,
    Continued,
    Resumed(String),
    LoopStarted { max_iterations: u32 },
    LoopRejected,
    Stopped { loop_cancelled: bool },
    CallbackIgnored,
}

/// Writes the pending marker and types into the terminal, keeping the two
/// consistent: the marker goes first, and is put back the way it was if
/// typing fails.
pub struct Injector {
    terminal: Arc<dyn Terminal>,
    chat: Arc<dyn ChatApi>,
    pending: PendingCoordinator,
    typing: TypingConfig,
    /// At most one typing indicator runs at a time.
    typing_task: Mutex<Option<JoinHandle<()>>>,
}

impl Injector {
    pub fn new(
        terminal: Arc<dyn Terminal>,
        chat: Arc<dyn ChatApi>,
        pending: PendingCoordinator,
        typing: TypingConfig,
    ) -> Self {
        Self {
            terminal,
            chat,
            pending,
            typing,
            typing_task: Mutex::new(None),
        }
    }

    pub fn pending(&self) -> &PendingCoordinator {
        &self.pending
    }

    pub fn terminal(&self) -> &dyn Terminal {
        self.terminal.as_ref()
    }

    /// Set the marker for `chat_id`, run `inject`, and restore the previous
    /// marker if it fails.
    pub async fn with_marker<F, Fut>(&self, chat_id: i64, inject: F) -> Result<(), DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), TmuxError>>,
    {
        let previous = self.pending.peek().unwrap_or_else(|e| {
            warn!("Replacing unreadable pending marker: {}", e);
            None
        });
        self.pending.set(chat_id)?;
        if let Err(e) = inject().await {
            self.restore_marker(previous);
            return Err(e.into());
        }
        self.start_typing(chat_id);
        Ok(())
    }

    /// Put back the marker `with_marker` replaced, so a rollback never reads
    /// as a delivered reply.
    fn restore_marker(&self, previous: Option<i64>) {
        let restored = match previous {
            Some(chat_id) => self.pending.set(chat_id),
            None => self.pending.clear().map(|_| ()),
        };
        if let Err(e) = restored {
            error!("Failed to roll back pending marker: {}", e);
        }
    }

    fn start_typing(&self, chat_id: i64) {
        let task =
            spawn_typing_indicator(self.chat.clone(), self.pending.clone(), chat_id, &self.typing);
        let mut current = self
            .typing_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = std::mem::replace(&mut *current, task) {
            previous.abort();
        }
    }

    /// Type `text` into the terminal as a prompt a reply is owed for.
    pub async fn inject_prompt(&self, chat_id: i64, text: &str) -> Result<(), DispatchError> {
        self.with_marker(chat_id, || self.terminal.send_keys(text))
            .await
    }

    /// Direct reply; failures are logged, never escalated.
    pub async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.chat.send_message(chat_id, text).await {
            warn!("Failed to send reply: {:#}", e);
        }
    }
}

/// Shared application state: one terminal, one marker, one loop.
pub struct Bridge {
    pub injector: Injector,
    pub ralph: RalphLoop,
    chat: Arc<dyn ChatApi>,
    access: AccessPolicy,
    sessions: SessionIndex,
    reaction_emoji: Option<String>,
    settle_delay: Duration,
    restart_delay: Duration,
    continue_command: String,
    resume_command: String,
}

impl Bridge {
    pub fn new(config: &Config, terminal: Arc<dyn Terminal>, chat: Arc<dyn ChatApi>) -> Self {
        let pending = PendingCoordinator::new(&config.paths.pending_file);
        Self {
            injector: Injector::new(terminal, chat.clone(), pending, config.typing.clone()),
            ralph: RalphLoop::new(config.ralph.max_iterations),
            chat,
            access: AccessPolicy::from_config(config),
            sessions: SessionIndex::new(&config.paths.history_file, &config.paths.projects_dir),
            reaction_emoji: config.reaction_emoji(),
            settle_delay: config.terminal.settle_delay(),
            restart_delay: config.terminal.restart_delay(),
            continue_command: config.terminal.continue_command.clone(),
            resume_command: config.terminal.resume_command.clone(),
        }
    }

    /// Gate, then dispatch. Errors have already been logged and answered with
    /// a best-effort reply when this returns.
    pub async fn handle_update(&self, update: &IncomingUpdate) -> Result<Dispatched, DispatchError> {
        if !self.access.allow(update) {
            debug!(chat_kind = ?update.chat_kind, "Access denied");
            return Ok(Dispatched::Denied);
        }

        let result = match &update.content {
            UpdateContent::Text(text) => self.dispatch(update, Command::parse(text)).await,
            UpdateContent::Callback { query_id, data } => {
                self.dispatch_callback(update, query_id, data).await
            }
        };

        if let Err(e) = &result {
            error!("Dispatch failed: {}", e);
            self.injector.notify(update.chat_id, e.user_message()).await;
        }
        result
    }

    pub async fn dispatch(
        &self,
        update: &IncomingUpdate,
        command: Command,
    ) -> Result<Dispatched, DispatchError> {
        let chat_id = update.chat_id;
        if command.acknowledged() {
            self.spawn_reaction(update);
        }

        match command {
            Command::Status => {
                let state = if self.injector.terminal().session_exists().await {
                    "running"
                } else {
                    "not found"
                };
                let session = self.injector.terminal().session_name();
                self.injector
                    .notify(chat_id, &format!("tmux '{session}': {state}"))
                    .await;
                Ok(Dispatched::Replied)
            }
            Command::Clear => {
                // A cleared conversation ends the running loop.
                if self.ralph.cancel().await {
                    info!("Ralph Loop cancelled by /clear");
                }
                self.injector.pending().clear()?;
                self.injector.terminal().interrupt().await?;
                tokio::time::sleep(self.settle_delay).await;
                self.injector.terminal().send_keys("/clear").await?;
                self.injector.notify(chat_id, "Cleared").await;
                Ok(Dispatched::Cleared)
            }
            Command::Resume => {
                match self.sessions.choices() {
                    Some(choices) => {
                        if let Err(e) = self
                            .chat
                            .send_choices(chat_id, "Select session:", &choices)
                            .await
                        {
                            warn!("Failed to send session chooser: {:#}", e);
                        }
                    }
                    None => self.injector.notify(chat_id, "No sessions").await,
                }
                Ok(Dispatched::Replied)
            }
            Command::Continue => self.continue_recent(chat_id).await,
            Command::Loop(prompt) => self.start_loop(update, &prompt).await,
            Command::Stop => self.stop(chat_id).await,
            Command::Blocked(name) => {
                self.injector
                    .notify(chat_id, &format!("'{name}' not supported (interactive)"))
                    .await;
                Ok(Dispatched::Replied)
            }
            Command::Prompt(text) => {
                info!(length = text.len(), "Prompt received");
                self.injector.inject_prompt(chat_id, &text).await?;
                Ok(Dispatched::Injected)
            }
        }
    }

    async fn dispatch_callback(
        &self,
        update: &IncomingUpdate,
        query_id: &str,
        data: &str,
    ) -> Result<Dispatched, DispatchError> {
        if let Err(e) = self.chat.answer_callback(query_id).await {
            warn!("Failed to answer callback: {:#}", e);
        }

        match CallbackAction::parse(data) {
            CallbackAction::ContinueRecent => self.continue_recent(update.chat_id).await,
            CallbackAction::Resume(session_id) => {
                let command = self.resume_command.replace("{session_id}", &session_id);
                self.restart_with(&command).await?;
                let short: String = session_id.chars().take(8).collect();
                self.injector
                    .notify(update.chat_id, &format!("Resuming: {short}..."))
                    .await;
                Ok(Dispatched::Resumed(session_id))
            }
            CallbackAction::Unknown => {
                debug!("Ignoring unknown callback payload");
                Ok(Dispatched::CallbackIgnored)
            }
        }
    }

    async fn continue_recent(&self, chat_id: i64) -> Result<Dispatched, DispatchError> {
        self.injector
            .with_marker(chat_id, || self.restart_with(&self.continue_command))
            .await?;
        self.injector.notify(chat_id, "Continuing...").await;
        Ok(Dispatched::Continued)
    }

    /// Leave the running program and start it again with `command`.
    async fn restart_with(&self, command: &str) -> Result<(), TmuxError> {
        let terminal = self.injector.terminal();
        terminal.interrupt().await?;
        tokio::time::sleep(self.settle_delay).await;
        terminal.send_keys("/exit").await?;
        tokio::time::sleep(self.restart_delay).await;
        terminal.send_keys(command).await
    }

    async fn start_loop(
        &self,
        update: &IncomingUpdate,
        prompt: &str,
    ) -> Result<Dispatched, DispatchError> {
        let chat_id = update.chat_id;
        match self.ralph.start(&self.injector, chat_id, prompt).await {
            Ok(max_iterations) => {
                self.spawn_reaction(update);
                self.injector
                    .notify(
                        chat_id,
                        &format!("Ralph Loop started (max {max_iterations} iterations)"),
                    )
                    .await;
                Ok(Dispatched::LoopStarted { max_iterations })
            }
            Err(LoopError::AlreadyRunning { remaining }) => {
                self.injector
                    .notify(
                        chat_id,
                        &format!(
                            "A Ralph Loop is already running ({remaining} iterations left). Use /stop first."
                        ),
                    )
                    .await;
                Ok(Dispatched::LoopRejected)
            }
            Err(LoopError::EmptyPrompt) => {
                self.injector.notify(chat_id, "Usage: /loop <prompt>").await;
                Ok(Dispatched::Replied)
            }
            Err(LoopError::Dispatch(e)) => Err(e),
        }
    }

    async fn stop(&self, chat_id: i64) -> Result<Dispatched, DispatchError> {
        let loop_cancelled = self.ralph.cancel().await;
        self.injector.pending().clear()?;
        match self.injector.terminal().interrupt().await {
            Ok(()) | Err(TmuxError::SessionNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.injector.notify(chat_id, "Interrupted").await;
        Ok(Dispatched::Stopped { loop_cancelled })
    }

    /// Fire-and-forget acknowledgment reaction.
    fn spawn_reaction(&self, update: &IncomingUpdate) {
        let (Some(emoji), Some(message_id)) = (self.reaction_emoji.clone(), update.message_id)
        else {
            return;
        };
        let chat = self.chat.clone();
        let chat_id = update.chat_id;
        tokio::spawn(async move {
            if let Err(e) = chat.send_reaction(chat_id, message_id, &emoji).await {
                warn!("Reaction failed: {:#}", e);
            }
        });
    }
}
