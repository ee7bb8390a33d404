/// Interactive commands of the terminal program that cannot be driven from
/// chat; they are refused instead of being typed into the session.
pub const BLOCKED_COMMANDS: [&str; 19] = [
    "/mcp",
    "/help",
    "/settings",
    "/config",
    "/model",
    "/compact",
    "/cost",
    "/doctor",
    "/init",
    "/login",
    "/logout",
    "/memory",
    "/permissions",
    "/pr",
    "/review",
    "/terminal",
    "/vim",
    "/approved-tools",
    "/listen",
];

/// Callback payload of the "Continue most recent" button.
pub const CONTINUE_RECENT: &str = "continue_recent";
/// Prefix of the per-session resume buttons.
pub const RESUME_PREFIX: &str = "resume:";

/// A chat message, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Clear,
    Resume,
    Continue,
    /// `/loop <prompt>`; the prompt may be empty, which is a usage error.
    Loop(String),
    Stop,
    Blocked(String),
    /// Anything else, typed into the terminal verbatim.
    Prompt(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        if !text.starts_with('/') {
            return Command::Prompt(text.to_string());
        }

        let (token, rest) = match text.find(char::is_whitespace) {
            Some(idx) => (&text[..idx], text[idx..].trim()),
            None => (text, ""),
        };
        // Group clients address commands as `/cmd@botname`.
        let name = token.split('@').next().unwrap_or(token);

        match name {
            "/status" => Command::Status,
            "/clear" => Command::Clear,
            "/resume" => Command::Resume,
            "/continue_" => Command::Continue,
            "/loop" => Command::Loop(rest.to_string()),
            "/stop" => Command::Stop,
            _ if BLOCKED_COMMANDS.contains(&name) => Command::Blocked(name.to_string()),
            _ => Command::Prompt(text.to_string()),
        }
    }

    /// Whether the sender gets an acknowledgment reaction as soon as the
    /// command is dispatched. `/loop` is acknowledged once the loop starts.
    pub fn acknowledged(&self) -> bool {
        matches!(self, Command::Prompt(_) | Command::Continue)
    }
}

/// An inline-keyboard button press, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    ContinueRecent,
    Resume(String),
    Unknown,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Self {
        if data == CONTINUE_RECENT {
            return CallbackAction::ContinueRecent;
        }
        match data.strip_prefix(RESUME_PREFIX) {
            Some(id) if is_valid_session_id(id) => CallbackAction::Resume(id.to_string()),
            _ => CallbackAction::Unknown,
        }
    }
}

/// Session ids end up on a shell command line, so only plain identifiers pass.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_prompt() {
        assert_eq!(
            Command::parse("hello there"),
            Command::Prompt("hello there".to_string())
        );
    }

    #[test]
    fn test_known_commands() {
        assert_eq!(Command::parse("/status"), Command::Status);
        assert_eq!(Command::parse("/clear"), Command::Clear);
        assert_eq!(Command::parse("/resume"), Command::Resume);
        assert_eq!(Command::parse("/continue_"), Command::Continue);
        assert_eq!(Command::parse("/stop"), Command::Stop);
    }

    #[test]
    fn test_loop_prompt_keeps_inner_whitespace() {
        assert_eq!(
            Command::parse("/loop  fix the   tests \n"),
            Command::Loop("fix the   tests".to_string())
        );
        assert_eq!(Command::parse("/loop"), Command::Loop(String::new()));
    }

    #[test]
    fn test_bot_suffix_is_stripped() {
        assert_eq!(Command::parse("/status@my_bot"), Command::Status);
        assert_eq!(
            Command::parse("/loop@my_bot go"),
            Command::Loop("go".to_string())
        );
    }

    #[test]
    fn test_commands_are_case_sensitive() {
        assert_eq!(
            Command::parse("/STATUS"),
            Command::Prompt("/STATUS".to_string())
        );
    }

    #[test]
    fn test_unknown_command_falls_through_with_slash() {
        assert_eq!(
            Command::parse("/ralph-loop:ralph-loop go"),
            Command::Prompt("/ralph-loop:ralph-loop go".to_string())
        );
    }

    #[test]
    fn test_blocked_commands() {
        assert_eq!(
            Command::parse("/model opus"),
            Command::Blocked("/model".to_string())
        );
        assert_eq!(
            Command::parse("/approved-tools"),
            Command::Blocked("/approved-tools".to_string())
        );
    }

    #[test]
    fn test_acknowledged_commands() {
        assert!(Command::parse("hi").acknowledged());
        assert!(Command::parse("/continue_").acknowledged());
        assert!(!Command::parse("/loop x").acknowledged());
        assert!(!Command::parse("/status").acknowledged());
        assert!(!Command::parse("/stop").acknowledged());
    }

    #[test]
    fn test_callback_actions() {
        assert_eq!(
            CallbackAction::parse("continue_recent"),
            CallbackAction::ContinueRecent
        );
        assert_eq!(
            CallbackAction::parse("resume:0b6f1c2e-aaaa-bbbb"),
            CallbackAction::Resume("0b6f1c2e-aaaa-bbbb".to_string())
        );
        assert_eq!(
            CallbackAction::parse("resume:abc; rm -rf /"),
            CallbackAction::Unknown
        );
        assert_eq!(CallbackAction::parse("resume:"), CallbackAction::Unknown);
        assert_eq!(CallbackAction::parse("other"), CallbackAction::Unknown);
    }
}
