use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Emoji values that switch the acknowledgment reaction off.
const REACTION_DISABLE_SENTINELS: [&str; 3] = ["none", "false", "0"];

/// Longest emoji string accepted for the reaction.
const MAX_REACTION_CHARS: usize = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ralph: RalphConfig,
    #[serde(default)]
    pub typing: TypingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Unguessable URL segment the webhook is served on. Generated when absent.
    #[serde(default)]
    pub webhook_path: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_reaction_emoji")]
    pub reaction_emoji: String,
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccessConfig {
    #[serde(default)]
    pub dm_allowed_user_id: Option<u64>,
    #[serde(default)]
    pub group_allowed_user_ids: Vec<u64>,
    /// Accept every group/channel sender while the group list is empty.
    #[serde(default = "default_true")]
    pub open_groups_when_unconfigured: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TerminalConfig {
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(default)]
    pub socket: Option<PathBuf>,
    /// tmux key name sent by `/stop`.
    #[serde(default = "default_interrupt_key")]
    pub interrupt_key: String,
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_continue_command")]
    pub continue_command: String,
    /// `{session_id}` is replaced with the chosen session.
    #[serde(default = "default_resume_command")]
    pub resume_command: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_pending_file")]
    pub pending_file: PathBuf,
    #[serde(default = "default_history_file")]
    pub history_file: PathBuf,
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSignal {
    /// A running loop's turn is complete once the reply-sender removed the marker.
    #[default]
    MarkerCleared,
    /// Only `POST /<webhook_path>/turn-complete` completes a turn.
    Explicit,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RalphConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub completion_signal: CompletionSignal,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TypingConfig {
    #[serde(default = "default_typing_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_typing_max_secs")]
    pub max_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_reaction_emoji() -> String {
    "\u{1F44D}".to_string()
}

fn default_api_timeout_secs() -> u64 {
    10
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_session() -> String {
    "claude".to_string()
}

fn default_interrupt_key() -> String {
    "Escape".to_string()
}

fn default_command_timeout_ms() -> u64 {
    5000
}

fn default_settle_delay_ms() -> u64 {
    200
}

fn default_restart_delay_ms() -> u64 {
    500
}

fn default_continue_command() -> String {
    "claude --continue --dangerously-skip-permissions".to_string()
}

fn default_resume_command() -> String {
    "claude --resume {session_id} --dangerously-skip-permissions".to_string()
}

fn default_pending_file() -> PathBuf {
    PathBuf::from("~/.claude/telegram_pending")
}

fn default_history_file() -> PathBuf {
    PathBuf::from("~/.claude/history.jsonl")
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("~/.claude/projects")
}

fn default_max_iterations() -> u32 {
    5
}

fn default_watch_interval_ms() -> u64 {
    2000
}

fn default_typing_interval_secs() -> u64 {
    4
}

fn default_typing_max_secs() -> u64 {
    600
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            webhook_path: None,
            webhook_secret: None,
            reaction_emoji: default_reaction_emoji(),
            api_timeout_secs: default_api_timeout_secs(),
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            dm_allowed_user_id: None,
            group_allowed_user_ids: Vec::new(),
            open_groups_when_unconfigured: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            session: default_session(),
            socket: None,
            interrupt_key: default_interrupt_key(),
            command_timeout_ms: default_command_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            continue_command: default_continue_command(),
            resume_command: default_resume_command(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            pending_file: default_pending_file(),
            history_file: default_history_file(),
            projects_dir: default_projects_dir(),
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            completion_signal: CompletionSignal::default(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_typing_interval_secs(),
            max_secs: default_typing_max_secs(),
        }
    }
}

impl TerminalConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl Config {
    /// Load the TOML file at `path` (defaults when it does not exist), then
    /// apply environment overrides and normalize paths.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            info!(
                "No config file at {}, using defaults and environment",
                path.display()
            );
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment. `lookup` is injectable so tests
    /// never touch the real process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(path) = lookup("WEBHOOK_PATH") {
            self.telegram.webhook_path = Some(path);
        }
        if let Some(secret) = lookup("TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(secret);
        }
        if let Some(emoji) = lookup("TELEGRAM_REACTION_EMOJI") {
            self.telegram.reaction_emoji = emoji;
        }
        if let Some(raw) = lookup("DM_ALLOWED_USER_ID") {
            self.access.dm_allowed_user_id = parse_dm_user_id(&raw);
        }
        if let Some(raw) = lookup("ALLOWED_TELEGRAM_USER_IDS") {
            self.access.group_allowed_user_ids = parse_user_id_list(&raw);
        }
        if let Some(session) = lookup("TMUX_SESSION") {
            self.terminal.session = session;
        }
        if let Some(socket) = lookup("TMUX_SOCKET") {
            self.terminal.socket = Some(PathBuf::from(socket));
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            match port.trim().parse() {
                Ok(p) => self.server.port = p,
                Err(_) => warn!("Invalid PORT '{}', keeping {}", port, self.server.port),
            }
        }
    }

    fn normalize(&mut self) {
        self.telegram.webhook_secret = self
            .telegram
            .webhook_secret
            .take()
            .filter(|s| !s.is_empty());
        self.telegram.webhook_path = self
            .telegram
            .webhook_path
            .take()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        self.paths.pending_file = expand_home(&self.paths.pending_file);
        self.paths.history_file = expand_home(&self.paths.history_file);
        self.paths.projects_dir = expand_home(&self.paths.projects_dir);
        if let Some(socket) = &self.terminal.socket {
            self.terminal.socket = Some(expand_home(socket));
        }
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN not set (telegram.bot_token)");
        }
        if self.ralph.max_iterations == 0 {
            anyhow::bail!("ralph.max_iterations must be at least 1");
        }
        Ok(())
    }

    /// The reaction emoji after applying the disable sentinels and length cap.
    pub fn reaction_emoji(&self) -> Option<String> {
        normalize_reaction_emoji(&self.telegram.reaction_emoji)
    }

    /// Group allow-list as a set.
    pub fn group_allowed_set(&self) -> HashSet<u64> {
        self.access.group_allowed_user_ids.iter().copied().collect()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Trim and validate a reaction emoji; `None` means reactions are disabled.
pub fn normalize_reaction_emoji(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if REACTION_DISABLE_SENTINELS.contains(&lowered.as_str()) {
        return None;
    }
    if trimmed.chars().count() > MAX_REACTION_CHARS {
        warn!("Reaction emoji longer than {} chars, disabling", MAX_REACTION_CHARS);
        return None;
    }
    Some(trimmed.to_string())
}

/// Parse a comma-separated list of user ids. Any malformed entry discards
/// the whole list.
pub fn parse_user_id_list(raw: &str) -> Vec<u64> {
    let parsed: Result<Vec<u64>, _> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<u64>)
        .collect();
    match parsed {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Invalid ALLOWED_TELEGRAM_USER_IDS ({}), ignoring list", e);
            Vec::new()
        }
    }
}

fn parse_dm_user_id(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Invalid DM_ALLOWED_USER_ID ({}), direct messages disabled", e);
            None
        }
    }
}

/// Generate a 64-hex-character webhook path.
pub fn generate_webhook_path() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
