//! Telegram webhook management.
//!
//! ```text
//! webhook [--config PATH] set [--domain DOMAIN]
//! webhook [--config PATH] info
//! webhook [--config PATH] delete
//! webhook [--config PATH] verify
//! ```
//!
//! Reads the bot token, webhook path and secret from the bridge's
//! `config.toml` and the same environment variables the bridge honours.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, WebhookInfo};
use teloxide::RequestError;

const RECENT_ERROR_WINDOW_SECS: i64 = 3600;

// ── Raw TOML parse structs (loose, so partial configs load) ────────────────────

#[derive(Deserialize, Default)]
struct RawConfig {
    telegram: Option<RawTelegram>,
}

#[derive(Deserialize, Default)]
struct RawTelegram {
    bot_token: Option<String>,
    webhook_path: Option<String>,
    webhook_secret: Option<String>,
}

#[derive(Debug, Default, PartialEq)]
struct Settings {
    token: String,
    path: Option<String>,
    secret: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_settings<F>(config_path: &Path, lookup: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let raw: RawConfig = if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Could not read {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Could not parse {}", config_path.display()))?
    } else {
        RawConfig::default()
    };
    let telegram = raw.telegram.unwrap_or_default();

    let token = non_empty(lookup("TELEGRAM_BOT_TOKEN")).or(non_empty(telegram.bot_token));
    let Some(token) = token else {
        bail!("TELEGRAM_BOT_TOKEN not set");
    };
    let path = non_empty(lookup("WEBHOOK_PATH"))
        .or(non_empty(telegram.webhook_path))
        .map(|p| p.trim_matches('/').to_string());
    let secret =
        non_empty(lookup("TELEGRAM_WEBHOOK_SECRET")).or(non_empty(telegram.webhook_secret));

    Ok(Settings {
        token,
        path,
        secret,
    })
}

// ── Bot API ────────────────────────────────────────────────────────────────────

/// The parts of `getWebhookInfo` the CLI reports on.
#[derive(Debug, Default)]
struct WebhookStatus {
    url: String,
    pending_update_count: u64,
    last_error_date: Option<i64>,
    last_error_message: Option<String>,
}

impl From<WebhookInfo> for WebhookStatus {
    fn from(info: WebhookInfo) -> Self {
        Self {
            url: info.url.map(|u| u.to_string()).unwrap_or_default(),
            pending_update_count: u64::from(info.pending_update_count),
            last_error_date: info.last_error_date.map(|d| d.timestamp()),
            last_error_message: info.last_error_message,
        }
    }
}

/// Update kinds the bridge handles.
fn allowed_updates() -> Vec<AllowedUpdate> {
    vec![
        AllowedUpdate::Message,
        AllowedUpdate::ChannelPost,
        AllowedUpdate::CallbackQuery,
    ]
}

struct BotApi {
    bot: Bot,
    token: String,
}

impl BotApi {
    fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
            token: token.to_string(),
        }
    }

    fn error(&self, method: &str, e: RequestError) -> anyhow::Error {
        anyhow!("{method} failed: {}", e.to_string().replace(&self.token, "<BOT_TOKEN>"))
    }

    async fn webhook_status(&self) -> Result<WebhookStatus> {
        let info = self
            .bot
            .get_webhook_info()
            .send()
            .await
            .map_err(|e| self.error("getWebhookInfo", e))?;
        Ok(info.into())
    }
}

// ── Pure helpers ───────────────────────────────────────────────────────────────

/// `https://<domain>/<path>`; the domain may carry a scheme or trailing slash.
fn webhook_url(domain: &str, path: &str) -> String {
    let host = domain
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    format!("https://{host}/{}", path.trim_matches('/'))
}

/// Warnings for a registered webhook, or an error when none is registered.
fn evaluate(info: &WebhookStatus, now: i64) -> Result<Vec<String>, String> {
    if info.url.is_empty() {
        return Err("No webhook URL set".to_string());
    }
    let mut warnings = Vec::new();
    if info.pending_update_count > 0 {
        warnings.push(format!(
            "Warning: {} pending updates",
            info.pending_update_count
        ));
    }
    if let Some(date) = info.last_error_date {
        if now - date < RECENT_ERROR_WINDOW_SECS {
            let detail = info.last_error_message.as_deref().unwrap_or("unknown");
            warnings.push(format!("Warning: Recent webhook error: {detail}"));
        }
    }
    Ok(warnings)
}

// ── Subcommands ────────────────────────────────────────────────────────────────

async fn run_set(api: &BotApi, settings: &Settings, domain: Option<String>) -> Result<()> {
    let Some(domain) = domain.or_else(|| non_empty(std::env::var("WEBHOOK_DOMAIN").ok())) else {
        bail!("No domain given: pass --domain or set WEBHOOK_DOMAIN");
    };
    let Some(path) = settings.path.as_deref() else {
        bail!("WEBHOOK_PATH not set (telegram.webhook_path)");
    };
    let url = webhook_url(&domain, path);
    let parsed = reqwest::Url::parse(&url).with_context(|| format!("Invalid webhook URL: {url}"))?;

    let mut request = api.bot.set_webhook(parsed).allowed_updates(allowed_updates());
    if let Some(secret) = &settings.secret {
        request = request.secret_token(secret.clone());
    }
    request
        .send()
        .await
        .map_err(|e| api.error("setWebhook", e))?;
    println!("✓  Webhook set: {url}");
    if settings.secret.is_none() {
        println!("   No secret token configured");
    }
    Ok(())
}

async fn run_info(api: &BotApi) -> Result<()> {
    let info = api.webhook_status().await?;
    let url = if info.url.is_empty() { "(none)" } else { info.url.as_str() };
    println!("URL:             {url}");
    println!("Pending updates: {}", info.pending_update_count);
    if let Some(message) = &info.last_error_message {
        println!("Last error:      {message}");
    }
    Ok(())
}

async fn run_delete(api: &BotApi) -> Result<()> {
    api.bot
        .delete_webhook()
        .drop_pending_updates(true)
        .send()
        .await
        .map_err(|e| api.error("deleteWebhook", e))?;
    println!("✓  Webhook deleted");
    Ok(())
}

async fn run_verify(api: &BotApi) -> Result<()> {
    let info = api.webhook_status().await?;
    match evaluate(&info, chrono::Utc::now().timestamp()) {
        Ok(warnings) => {
            for warning in warnings {
                println!("{warning}");
            }
            println!("Webhook OK: {}", info.url);
            Ok(())
        }
        Err(reason) => bail!(reason),
    }
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn usage() -> &'static str {
    "usage: webhook [--config PATH] <set [--domain DOMAIN] | info | delete | verify>"
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("config.toml");
    let mut domain = None;
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = PathBuf::from(args.next().context(usage())?),
            "--domain" => domain = Some(args.next().context(usage())?),
            "-h" | "--help" => {
                println!("{}", usage());
                return Ok(());
            }
            _ if command.is_none() => command = Some(arg),
            _ => bail!(usage()),
        }
    }
    let Some(command) = command else {
        bail!(usage());
    };

    let settings = load_settings(&config_path, |key| std::env::var(key).ok())?;
    let api = BotApi::new(&settings.token);

    match command.as_str() {
        "set" => run_set(&api, &settings, domain).await,
        "info" => run_info(&api).await,
        "delete" => run_delete(&api).await,
        "verify" => run_verify(&api).await,
        _ => bail!(usage()),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
