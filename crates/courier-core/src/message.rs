use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, UserId};

/// Reserved sender identity for AI-authored messages. Never a real account.
pub const AI_SENDER_ID: &str = "user_ai";

/// Sentinel token that closes an AI token stream on the wire. Excluded from
/// the persisted message text.
pub const END_OF_STREAM_TOKEN: &str = "[DONE]";

/// Fixed notice broadcast to a conversation when AI generation fails.
pub const AI_FALLBACK_NOTICE: &str = "AI is currently unavailable. Please try again later.";

pub fn ai_sender() -> UserId {
    UserId::from_raw(AI_SENDER_ID)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    System,
}

/// Who a message is addressed to. Messages for the AI additionally trigger
/// the streaming orchestrator after the normal broadcast.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recipient {
    #[default]
    Users,
    Ai,
}

/// The wire payload of the conversation-message channel, and the value
/// persisted for every chat message. A missing recipient defaults to Users;
/// a missing timestamp defaults to the moment of decoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    #[serde(default = "MessageId::new")]
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<MessageId>,
    #[serde(default)]
    pub recipient: Recipient,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl MessageEvent {
    /// A finished AI response addressed back to the human participants.
    pub fn ai_text(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::new(),
            conversation_id,
            sender_id: ai_sender(),
            text: text.into(),
            kind: MessageType::Text,
            reply_to_message_id: None,
            recipient: Recipient::Users,
            occurred_at: Utc::now(),
        }
    }
}
