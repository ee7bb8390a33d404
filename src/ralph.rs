//! Ralph Loop: re-submit the same prompt after every completed turn, up to a
//! fixed number of turns.
//!
//! States: `Idle -> Running(n) -> {Running(n-1), Cancelled, Completed}`. A new
//! `/loop` is accepted from any state except `Running`. All transitions happen
//! under one mutex, and the side effects of a transition (marker write,
//! injection, notification) run while it is held, so two racing `/loop`
//! commands can never both observe a free controller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, DispatchError, Injector};

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("a Ralph Loop is already running ({remaining} iterations left)")]
    AlreadyRunning { remaining: u32 },
    #[error("loop prompt is empty")]
    EmptyPrompt,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    /// Turns not yet completed, including the one in flight.
    pub remaining_iterations: u32,
    pub prompt: String,
    pub target_chat_id: i64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoopPhase {
    #[default]
    Idle,
    Running(LoopState),
    Completed,
    Cancelled,
}

impl LoopPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, LoopPhase::Running(_))
    }
}

/// What a completed-turn signal did to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    NotRunning,
    /// The signal named a different chat than the loop's target.
    OtherChat,
    /// The marker is still present; the turn has not finished.
    StillPending,
    Continued { remaining: u32 },
    Completed,
}

pub struct RalphLoop {
    phase: Mutex<LoopPhase>,
    max_iterations: u32,
}

impl RalphLoop {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            phase: Mutex::new(LoopPhase::Idle),
            max_iterations: max_iterations.max(1),
        }
    }

    #[cfg(test)]
    pub async fn phase(&self) -> LoopPhase {
        self.phase.lock().await.clone()
    }

    /// Begin a loop: write the marker and inject the prompt.
    pub async fn start(
        &self,
        injector: &Injector,
        chat_id: i64,
        prompt: &str,
    ) -> Result<u32, LoopError> {
        let mut phase = self.phase.lock().await;
        if let LoopPhase::Running(state) = &*phase {
            return Err(LoopError::AlreadyRunning {
                remaining: state.remaining_iterations,
            });
        }
        if prompt.trim().is_empty() {
            return Err(LoopError::EmptyPrompt);
        }

        *phase = LoopPhase::Running(LoopState {
            remaining_iterations: self.max_iterations,
            prompt: prompt.to_string(),
            target_chat_id: chat_id,
            started_at: Utc::now(),
        });

        if let Err(e) = injector.inject_prompt(chat_id, prompt).await {
            *phase = LoopPhase::Idle;
            return Err(e.into());
        }

        info!(max_iterations = self.max_iterations, "Ralph Loop started");
        Ok(self.max_iterations)
    }

    /// A turn finished. `chat_id` of `None` means "the loop's own chat".
    pub async fn turn_complete(
        &self,
        injector: &Injector,
        chat_id: Option<i64>,
    ) -> Result<TurnOutcome, LoopError> {
        let mut phase = self.phase.lock().await;
        Self::advance(&mut phase, injector, chat_id).await
    }

    /// Treat a vanished marker as a completed turn for the running loop.
    pub async fn observe_marker(&self, injector: &Injector) -> Result<TurnOutcome, LoopError> {
        let mut phase = self.phase.lock().await;
        if !phase.is_running() {
            return Ok(TurnOutcome::NotRunning);
        }
        if injector.pending().is_pending() {
            return Ok(TurnOutcome::StillPending);
        }
        Self::advance(&mut phase, injector, None).await
    }

    async fn advance(
        phase: &mut LoopPhase,
        injector: &Injector,
        chat_id: Option<i64>,
    ) -> Result<TurnOutcome, LoopError> {
        let LoopPhase::Running(state) = phase else {
            return Ok(TurnOutcome::NotRunning);
        };
        if chat_id.is_some_and(|id| id != state.target_chat_id) {
            return Ok(TurnOutcome::OtherChat);
        }

        state.remaining_iterations = state.remaining_iterations.saturating_sub(1);
        let target = state.target_chat_id;

        if state.remaining_iterations == 0 {
            *phase = LoopPhase::Completed;
            info!("Ralph Loop completed");
            injector.notify(target, "Ralph Loop finished").await;
            return Ok(TurnOutcome::Completed);
        }

        let remaining = state.remaining_iterations;
        let prompt = state.prompt.clone();
        debug!(remaining, "Ralph Loop re-injecting prompt");
        if let Err(e) = injector.inject_prompt(target, &prompt).await {
            *phase = LoopPhase::Idle;
            error!("Ralph Loop aborted: {}", e);
            injector
                .notify(target, "Ralph Loop aborted: terminal unreachable")
                .await;
            return Err(e.into());
        }
        Ok(TurnOutcome::Continued { remaining })
    }

    /// Force `Cancelled` from `Running`. Returns whether a loop was running.
    pub async fn cancel(&self) -> bool {
        let mut phase = self.phase.lock().await;
        if phase.is_running() {
            *phase = LoopPhase::Cancelled;
            info!("Ralph Loop cancelled");
            true
        } else {
            false
        }
    }
}

/// Poll the marker and advance the running loop whenever the reply-sender
/// has consumed it.
pub fn spawn_marker_watcher(bridge: Arc<Bridge>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match bridge.ralph.observe_marker(&bridge.injector).await {
                Ok(TurnOutcome::Continued { remaining }) => {
                    debug!(remaining, "Ralph Loop advanced after reply");
                }
                Ok(_) => {}
                Err(e) => warn!("Ralph Loop watcher: {}", e),
            }
        }
    });
}
