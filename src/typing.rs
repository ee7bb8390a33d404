use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TypingConfig;
use crate::pending::PendingCoordinator;
use crate::platform::telegram::ChatApi;

/// Keep a "typing" indicator alive in `chat_id` while a reply is owed there.
///
/// Stops as soon as the marker is gone or points at another chat, or after
/// `max_secs`. A zero interval disables the indicator entirely.
pub fn spawn_typing_indicator(
    chat: Arc<dyn ChatApi>,
    pending: PendingCoordinator,
    chat_id: i64,
    config: &TypingConfig,
) -> Option<JoinHandle<()>> {
    if config.interval_secs == 0 {
        return None;
    }
    let interval = Duration::from_secs(config.interval_secs);
    let max = Duration::from_secs(config.max_secs);

    Some(tokio::spawn(async move {
        let started = Instant::now();
        loop {
            match pending.peek() {
                Ok(Some(id)) if id == chat_id => {}
                _ => break,
            }
            if started.elapsed() >= max {
                debug!("Typing indicator reached its time limit");
                break;
            }
            if let Err(e) = chat.send_typing(chat_id).await {
                warn!("Typing indicator failed: {:#}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }))
}
