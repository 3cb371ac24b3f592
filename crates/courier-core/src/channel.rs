use serde::{Deserialize, Serialize};

/// The fixed categories of real-time traffic. Used as the dispatch key for
/// strategy selection and as the first component of every routing key.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    AiTokenStream,
    ConversationMessage,
    ConversationUserNotification,
    ConversationGroupNotification,
    SystemNotification,
    ProjectSelectedFiles,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::AiTokenStream,
        ChannelKind::ConversationMessage,
        ChannelKind::ConversationUserNotification,
        ChannelKind::ConversationGroupNotification,
        ChannelKind::SystemNotification,
        ChannelKind::ProjectSelectedFiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiTokenStream => "ai_token_stream",
            Self::ConversationMessage => "conversation_message",
            Self::ConversationUserNotification => "conversation_user_notification",
            Self::ConversationGroupNotification => "conversation_group_notification",
            Self::SystemNotification => "system_notification",
            Self::ProjectSelectedFiles => "project_selected_files",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_snake_case() {
        assert_eq!(ChannelKind::AiTokenStream.to_string(), "ai_token_stream");
        assert_eq!(
            ChannelKind::ProjectSelectedFiles.to_string(),
            "project_selected_files"
        );
    }

    #[test]
    fn all_covers_every_kind() {
        assert_eq!(ChannelKind::ALL.len(), 6);
        let mut seen = std::collections::HashSet::new();
        for kind in ChannelKind::ALL {
            seen.insert(kind.as_str());
        }
        assert_eq!(seen.len(), 6);
    }
}
