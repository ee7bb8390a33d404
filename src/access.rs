use std::collections::HashSet;

use crate::config::Config;
use crate::platform::{ChatKind, IncomingUpdate};

/// Who may drive the terminal. Loaded once, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    /// The only user accepted in direct messages. `None` rejects every DM.
    pub dm_allowed_user_id: Option<u64>,
    /// Senders accepted in groups and channels.
    pub group_allowed_user_ids: HashSet<u64>,
    /// With an empty group list, accept every group/channel sender.
    pub open_groups_when_unconfigured: bool,
}

impl AccessPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dm_allowed_user_id: config.access.dm_allowed_user_id,
            group_allowed_user_ids: config.group_allowed_set(),
            open_groups_when_unconfigured: config.access.open_groups_when_unconfigured,
        }
    }

    pub fn allow(&self, update: &IncomingUpdate) -> bool {
        match update.chat_kind {
            ChatKind::Private => match (self.dm_allowed_user_id, update.sender_user_id) {
                (Some(allowed), Some(sender)) => allowed == sender,
                _ => false,
            },
            ChatKind::Group | ChatKind::Channel => {
                if self.group_allowed_user_ids.is_empty() {
                    return self.open_groups_when_unconfigured;
                }
                update
                    .sender_user_id
                    .is_some_and(|sender| self.group_allowed_user_ids.contains(&sender))
            }
        }
    }
}
