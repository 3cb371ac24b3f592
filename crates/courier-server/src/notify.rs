use std::sync::Arc;

use tracing::{debug, warn};

use courier_core::channel::ChannelKind;
use courier_core::context::{DispatchContext, ATTR_CONVERSATION_ID};
use courier_core::ids::{ConversationId, UserId};
use courier_core::message::AI_SENDER_ID;
use courier_dispatch::{Dispatcher, ParticipantCoordinator, Payload};

/// Fixed notice pushed on the user-notification channel when a conversation
/// gains a message.
pub const NEW_MESSAGE_NOTICE: &str = "new-message";

/// Notification fan-out over the dispatcher. Recipients come from the cached
/// participant set; a recipient without a ready socket is skipped, never an
/// error.
pub struct Notifier {
    dispatcher: Arc<Dispatcher>,
    participants: Arc<ParticipantCoordinator>,
}

impl Notifier {
    pub fn new(dispatcher: Arc<Dispatcher>, participants: Arc<ParticipantCoordinator>) -> Self {
        Self {
            dispatcher,
            participants,
        }
    }

    /// Tell every participant except the sender that the conversation has a
    /// new message.
    pub async fn notify_new_message(&self, conversation: &ConversationId, sender: &UserId) {
        let members = match self.participants.members(conversation).await {
            Ok(members) => members,
            Err(e) => {
                warn!(conversation_id = %conversation, error = %e, "participant fetch failed, skipping fan-out");
                return;
            }
        };
        for user in members.iter().filter(|user| *user != sender) {
            self.push_user_notice(conversation, user, NEW_MESSAGE_NOTICE)
                .await;
        }
    }

    /// Broadcast a notice to every participant of a conversation.
    pub async fn notify_conversation(&self, conversation: &ConversationId, text: &str) {
        let members = match self.participants.members(conversation).await {
            Ok(members) => members,
            Err(e) => {
                warn!(conversation_id = %conversation, error = %e, "participant fetch failed, skipping notice");
                return;
            }
        };
        for user in &members {
            self.push_user_notice(conversation, user, text).await;
        }
    }

    /// Push a notice on the user's system channel. The synthetic AI identity
    /// has no socket and is skipped outright.
    pub async fn notify_user(&self, user: &UserId, text: &str) {
        if user.as_str() == AI_SENDER_ID {
            return;
        }
        let ctx = DispatchContext::new(user.clone());
        if let Err(e) = self
            .dispatcher
            .send(ChannelKind::SystemNotification, &ctx, &Payload::text(text))
            .await
        {
            debug!(user_id = %user, error = %e, "system notice skipped");
        }
    }

    async fn push_user_notice(&self, conversation: &ConversationId, user: &UserId, text: &str) {
        let ctx = DispatchContext::new(user.clone())
            .with(ATTR_CONVERSATION_ID, conversation.as_str());
        if let Err(e) = self
            .dispatcher
            .send(
                ChannelKind::ConversationUserNotification,
                &ctx,
                &Payload::text(text),
            )
            .await
        {
            // Offline recipients are expected; persistence remains the
            // system of record.
            debug!(user_id = %user, conversation_id = %conversation, error = %e, "notification skipped");
        }
    }
}
