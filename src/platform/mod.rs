pub mod telegram;

/// Kind of chat an update arrived in. Supergroups are folded into `Group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

/// What the sender actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateContent {
    Text(String),
    /// An inline-keyboard button press.
    Callback { query_id: String, data: String },
}

/// One inbound chat event, validated and reduced to the fields the bridge uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingUpdate {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    /// Absent for anonymous channel posts.
    pub sender_user_id: Option<u64>,
    pub message_id: Option<i32>,
    pub content: UpdateContent,
}

/// One row of the `/resume` chooser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceButton {
    pub label: String,
    pub data: String,
}
