use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    Router,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::bridge::Bridge;
use crate::config::CompletionSignal;
use crate::platform::{ChatKind, IncomingUpdate, UpdateContent};

/// Header the chat platform carries the shared webhook secret in.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Suffix of the loop completion trigger, below the webhook path.
pub const TURN_COMPLETE_SEGMENT: &str = "turn-complete";

#[derive(Debug, Clone)]
pub struct WebhookCredentials {
    /// Unguessable path segment, without slashes.
    pub path: String,
    pub secret: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("webhook authentication failed")]
    Auth,
    #[error("malformed update: {0}")]
    Parse(String),
    #[error("update has nothing to handle")]
    Ignored,
}

impl Rejection {
    /// Only authentication failures are visible to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Auth => StatusCode::UNAUTHORIZED,
            Rejection::Parse(_) | Rejection::Ignored => StatusCode::OK,
        }
    }

    fn reply(&self) -> Reply {
        let status = self.status();
        if status == StatusCode::UNAUTHORIZED {
            (status, "Unauthorized")
        } else {
            (status, "OK")
        }
    }
}

// ── Raw update payload (only the fields the bridge reads) ─────────────────────

#[derive(Debug, Deserialize)]
struct RawUpdate {
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    channel_post: Option<RawMessage>,
    #[serde(default)]
    callback_query: Option<RawCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    message_id: i32,
    #[serde(default)]
    from: Option<RawUser>,
    chat: RawChat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
    #[serde(rename = "type")]
    kind: RawChatType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawChatType {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawCallbackQuery {
    id: String,
    from: RawUser,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    data: Option<String>,
}

impl RawChatType {
    fn kind(&self) -> Option<ChatKind> {
        match self {
            RawChatType::Private => Some(ChatKind::Private),
            RawChatType::Group | RawChatType::Supergroup => Some(ChatKind::Group),
            RawChatType::Channel => Some(ChatKind::Channel),
            RawChatType::Unknown => None,
        }
    }
}

// ── Ingress validation ────────────────────────────────────────────────────────

pub fn path_matches(request_path: &str, credentials: &WebhookCredentials) -> bool {
    request_path.trim_start_matches('/') == credentials.path
}

/// Constant-time check of the secret header. Always true when no secret is
/// configured.
pub fn secret_matches(headers: &HeaderMap, credentials: &WebhookCredentials) -> bool {
    let Some(expected) = credentials.secret.as_deref() else {
        return true;
    };
    match headers.get(SECRET_HEADER) {
        Some(provided) => provided.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    }
}

/// Reduce a raw update body to an `IncomingUpdate`.
pub fn parse_update(body: &[u8]) -> Result<IncomingUpdate, Rejection> {
    let raw: RawUpdate =
        serde_json::from_slice(body).map_err(|e| Rejection::Parse(e.to_string()))?;

    if let Some(cb) = raw.callback_query {
        let message = cb.message.ok_or(Rejection::Ignored)?;
        let data = cb.data.ok_or(Rejection::Ignored)?;
        return Ok(IncomingUpdate {
            chat_id: message.chat.id,
            chat_kind: message.chat.kind.kind().ok_or(Rejection::Ignored)?,
            sender_user_id: Some(cb.from.id),
            message_id: Some(message.message_id),
            content: UpdateContent::Callback {
                query_id: cb.id,
                data,
            },
        });
    }

    let message = raw
        .message
        .or(raw.channel_post)
        .ok_or(Rejection::Ignored)?;
    let text = message
        .text
        .filter(|t| !t.is_empty())
        .ok_or(Rejection::Ignored)?;
    Ok(IncomingUpdate {
        chat_id: message.chat.id,
        chat_kind: message.chat.kind.kind().ok_or(Rejection::Ignored)?,
        sender_user_id: message.from.map(|u| u.id),
        message_id: Some(message.message_id),
        content: UpdateContent::Text(text),
    })
}

/// Authenticate and parse one webhook delivery. No side effects.
pub fn validate(
    request_path: &str,
    headers: &HeaderMap,
    body: &[u8],
    credentials: &WebhookCredentials,
) -> Result<IncomingUpdate, Rejection> {
    if !path_matches(request_path, credentials) || !secret_matches(headers, credentials) {
        return Err(Rejection::Auth);
    }
    parse_update(body)
}

// ── HTTP surface ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct WebhookState {
    bridge: Arc<Bridge>,
    credentials: Arc<WebhookCredentials>,
    completion: CompletionSignal,
}

#[derive(Debug, Deserialize, Default)]
struct TurnComplete {
    #[serde(default)]
    chat_id: Option<i64>,
}

type Reply = (StatusCode, &'static str);

const UNAUTHORIZED: Reply = (StatusCode::UNAUTHORIZED, "Unauthorized");
const OK: Reply = (StatusCode::OK, "OK");

pub fn router(
    bridge: Arc<Bridge>,
    credentials: WebhookCredentials,
    completion: CompletionSignal,
) -> Router {
    let state = WebhookState {
        bridge,
        credentials: Arc::new(credentials),
        completion,
    };
    Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(
    State(state): State<WebhookState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let request_path = uri.path();
    let path = request_path.trim_start_matches('/');
    let credentials = state.credentials.as_ref();

    if path == credentials.path {
        return match method {
            Method::GET => (StatusCode::OK, "Telegram bridge"),
            Method::POST => handle_webhook(&state, request_path, &headers, &body).await,
            _ => {
                debug!(method = %method, "Ignoring request method on webhook path");
                OK
            }
        };
    }

    let is_trigger = path
        .strip_prefix(credentials.path.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| rest == TURN_COMPLETE_SEGMENT);
    if is_trigger && method == Method::POST && !credentials.path.is_empty() {
        return handle_turn_complete(&state, &headers, &body).await;
    }

    warn!(method = %method, "Rejected request on unknown path");
    UNAUTHORIZED
}

async fn handle_webhook(
    state: &WebhookState,
    request_path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Reply {
    let update = match validate(request_path, headers, body, &state.credentials) {
        Ok(update) => update,
        Err(rejection) => {
            if rejection == Rejection::Auth {
                warn!("Rejected webhook delivery: {}", rejection);
            } else {
                debug!("Webhook update not handled: {}", rejection);
            }
            return rejection.reply();
        }
    };

    // Errors are logged and answered inside the bridge; the platform only
    // ever sees 200 for an authenticated delivery.
    match state.bridge.handle_update(&update).await {
        Ok(outcome) => debug!(?outcome, "Update dispatched"),
        Err(e) => debug!("Update dispatch ended with error: {}", e),
    }
    OK
}

async fn handle_turn_complete(state: &WebhookState, headers: &HeaderMap, body: &[u8]) -> Reply {
    if !secret_matches(headers, &state.credentials) {
        warn!("Rejected turn-complete trigger: bad secret");
        return UNAUTHORIZED;
    }
    if state.completion != CompletionSignal::Explicit {
        debug!("Turn-complete trigger ignored: loop follows the pending marker");
        return (StatusCode::OK, "ignored");
    }

    let signal: TurnComplete = if body.is_empty() {
        TurnComplete::default()
    } else {
        match serde_json::from_slice(body) {
            Ok(s) => s,
            Err(e) => {
                debug!("Malformed turn-complete body: {}", e);
                return (StatusCode::BAD_REQUEST, "Bad Request");
            }
        }
    };

    match state
        .bridge
        .ralph
        .turn_complete(&state.bridge.injector, signal.chat_id)
        .await
    {
        Ok(outcome) => debug!(?outcome, "Turn-complete trigger handled"),
        Err(e) => error!("Turn-complete trigger failed: {}", e),
    }
    OK
}
