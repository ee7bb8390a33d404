mod access;
mod bridge;
mod commands;
mod config;
mod pending;
mod platform;
mod ralph;
mod sessions;
mod terminal;
#[cfg(test)]
mod testing;
mod typing;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::Bridge;
use crate::config::{generate_webhook_path, CompletionSignal, Config};
use crate::platform::telegram::TelegramApi;
use crate::terminal::{Terminal, TmuxTerminal};
use crate::webhook::WebhookCredentials;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tmux_bridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let webhook_path = match config.telegram.webhook_path.clone() {
        Some(path) => path,
        None => {
            let path = generate_webhook_path();
            warn!("WEBHOOK_PATH not set, generated one for this run: {}", path);
            warn!("Persist it as telegram.webhook_path so the webhook survives restarts");
            config.telegram.webhook_path = Some(path.clone());
            path
        }
    };
    if config.telegram.webhook_secret.is_none() {
        warn!("No webhook secret configured, deliveries are authenticated by path only");
    }

    info!("Configuration loaded successfully");
    info!("  tmux session: {}", config.terminal.session);
    info!("  DM user: {:?}", config.access.dm_allowed_user_id);
    info!("  Group users: {:?}", config.access.group_allowed_user_ids);
    info!("  Ralph Loop: {} iterations, {:?}", config.ralph.max_iterations, config.ralph.completion_signal);

    let telegram = Arc::new(TelegramApi::new(
        &config.telegram.bot_token,
        Duration::from_secs(config.telegram.api_timeout_secs),
    ));
    if let Err(e) = telegram.register_commands().await {
        warn!("Failed to register bot commands: {:#}", e);
    }

    let terminal = Arc::new(TmuxTerminal::new(&config.terminal));
    if !terminal.session_exists().await {
        warn!(
            "tmux session '{}' not found, prompts will fail until it is started",
            terminal.session_name()
        );
    }

    let bridge = Arc::new(Bridge::new(&config, terminal, telegram));
    info!("Pending marker: {}", bridge.injector.pending().path().display());

    if config.ralph.completion_signal == CompletionSignal::MarkerCleared {
        ralph::spawn_marker_watcher(
            bridge.clone(),
            Duration::from_millis(config.ralph.watch_interval_ms),
        );
    }

    let app = webhook::router(
        bridge,
        WebhookCredentials {
            path: webhook_path,
            secret: config.telegram.webhook_secret.clone(),
        },
        config.ralph.completion_signal,
    );

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Bridge listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}
