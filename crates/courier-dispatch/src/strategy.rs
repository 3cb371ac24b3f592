use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use courier_core::channel::ChannelKind;
use courier_core::context::{DispatchContext, ATTR_CONVERSATION_ID, ATTR_PROJECT_ID};
use courier_core::ids::{ConversationId, ProjectId, UserId};
use courier_core::message::{MessageEvent, Recipient};

use crate::error::DispatchError;
use crate::participants::ParticipantCoordinator;
use crate::readiness::ReadinessCoordinator;
use crate::registry::{SessionHandle, SessionRegistry, CLOSE_POLICY_VIOLATION};

/// Sent to a socket before closing it for an authorization failure.
pub const DENIAL_NOTICE: &str = "You are not a participant of this conversation.";

/// System-channel notice for a sender whose message could not be persisted.
pub const PROCESSING_FAILED_NOTICE: &str = "Message processing failed";

/// Outbound payload. Text channels pass through unchanged; message channels
/// encode to the JSON wire form.
#[derive(Clone, Debug)]
pub enum Payload {
    Text(String),
    Message(MessageEvent),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn encode(&self) -> Result<String, DispatchError> {
        match self {
            Self::Text(text) => Ok(text.clone()),
            Self::Message(event) => Ok(serde_json::to_string(event)?),
        }
    }
}

/// Follow-on work queued by the conversation-message receive pipeline and
/// drained by the server's effect worker. Decouples the strategy from the
/// notifier and AI orchestrator that themselves depend on the dispatcher.
#[derive(Clone, Debug)]
pub enum InboundEffect {
    NewMessage {
        conversation_id: ConversationId,
        sender_id: UserId,
        recipient: Recipient,
    },
    SystemNotice {
        user_id: UserId,
        text: String,
    },
}

/// Persistence collaborator for inbound chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, event: &MessageEvent) -> Result<(), DispatchError>;
}

/// Shared wiring behind every strategy.
#[derive(Clone)]
pub(crate) struct StrategyCore {
    pub registry: Arc<SessionRegistry>,
    pub readiness: Arc<ReadinessCoordinator>,
    pub participants: Arc<ParticipantCoordinator>,
}

pub(crate) struct AiTokenStrategy {
    pub core: StrategyCore,
}

pub(crate) struct ConversationMessageStrategy {
    pub core: StrategyCore,
    pub messages: Arc<dyn MessageStore>,
    pub effects: mpsc::Sender<InboundEffect>,
}

pub(crate) struct UserNotificationStrategy {
    pub core: StrategyCore,
}

pub(crate) struct GroupNotificationStrategy {
    pub core: StrategyCore,
}

pub(crate) struct SystemNotificationStrategy {
    pub core: StrategyCore,
}

pub(crate) struct ProjectSelectedFilesStrategy {
    pub core: StrategyCore,
}

/// One variant per channel kind; behavior differences live in the match arms
/// below. Selected once at startup through the dispatcher's fixed table.
pub(crate) enum ChannelStrategy {
    AiToken(AiTokenStrategy),
    ConversationMessage(ConversationMessageStrategy),
    UserNotification(UserNotificationStrategy),
    GroupNotification(GroupNotificationStrategy),
    SystemNotification(SystemNotificationStrategy),
    ProjectSelectedFiles(ProjectSelectedFilesStrategy),
}

impl ChannelStrategy {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::AiToken(_) => ChannelKind::AiTokenStream,
            Self::ConversationMessage(_) => ChannelKind::ConversationMessage,
            Self::UserNotification(_) => ChannelKind::ConversationUserNotification,
            Self::GroupNotification(_) => ChannelKind::ConversationGroupNotification,
            Self::SystemNotification(_) => ChannelKind::SystemNotification,
            Self::ProjectSelectedFiles(_) => ChannelKind::ProjectSelectedFiles,
        }
    }

    fn core(&self) -> &StrategyCore {
        match self {
            Self::AiToken(s) => &s.core,
            Self::ConversationMessage(s) => &s.core,
            Self::UserNotification(s) => &s.core,
            Self::GroupNotification(s) => &s.core,
            Self::SystemNotification(s) => &s.core,
            Self::ProjectSelectedFiles(s) => &s.core,
        }
    }

    /// Channel-kind namespace plus the context attribute the kind routes on.
    pub fn routing_key(&self, ctx: &DispatchContext) -> Result<String, DispatchError> {
        let key = match self {
            Self::AiToken(_) => format!("ai-token:{}", ctx.attr(ATTR_CONVERSATION_ID)?),
            Self::ConversationMessage(_) => {
                format!("conversation:{}", ctx.attr(ATTR_CONVERSATION_ID)?)
            }
            Self::UserNotification(_) => format!(
                "conversation-user:{}:{}",
                ctx.attr(ATTR_CONVERSATION_ID)?,
                ctx.user_id
            ),
            Self::GroupNotification(_) => {
                format!("conversation-group:{}", ctx.attr(ATTR_CONVERSATION_ID)?)
            }
            Self::SystemNotification(_) => format!("system:{}", ctx.user_id),
            Self::ProjectSelectedFiles(_) => {
                format!("project-selected:{}", ctx.attr(ATTR_PROJECT_ID)?)
            }
        };
        Ok(key)
    }

    pub async fn register(
        &self,
        session: &SessionHandle,
        ctx: &DispatchContext,
    ) -> Result<(), DispatchError> {
        let key = self.routing_key(ctx)?;
        let core = self.core();

        // Registry first: a reader that observes the ready flag must find a
        // receiving session behind it.
        core.registry.register(self.kind(), &key, session.clone());
        core.readiness.mark_ready(&key, &ctx.user_id).await?;
        debug!(channel = %self.kind(), key = %key, user_id = %ctx.user_id, "session registered");

        if let Self::ConversationMessage(_) = self {
            let conversation = ConversationId::from_raw(ctx.attr(ATTR_CONVERSATION_ID)?);
            core.participants.add(&conversation, &ctx.user_id).await?;
        }
        Ok(())
    }

    pub async fn deregister(
        &self,
        session: &SessionHandle,
        ctx: &DispatchContext,
    ) -> Result<(), DispatchError> {
        let key = self.routing_key(ctx)?;
        let core = self.core();

        core.registry.remove(self.kind(), &key, session.id());
        debug!(channel = %self.kind(), key = %key, user_id = %ctx.user_id, "session deregistered");
        // Ready flags are left to expire: clearing here would race a fast
        // reconnect that just marked its own flag under the same key.

        if let Self::ConversationMessage(_) = self {
            let conversation = ConversationId::from_raw(ctx.attr(ATTR_CONVERSATION_ID)?);
            core.participants
                .remove(&conversation, &ctx.user_id)
                .await?;
        }
        Ok(())
    }

    pub async fn is_ready(&self, ctx: &DispatchContext) -> Result<bool, DispatchError> {
        let key = self.routing_key(ctx)?;
        let ready = match self {
            // The AI does not target one fixed user; any ready participant
            // under the key suffices.
            Self::AiToken(_) => self.core().readiness.has_any_ready(&key).await,
            _ => self.core().readiness.is_ready(&key, &ctx.user_id).await,
        };
        Ok(ready)
    }

    /// Encode once, write to every session under the routing key. A bad
    /// socket never fails its siblings.
    pub async fn send(&self, ctx: &DispatchContext, payload: &Payload) -> Result<(), DispatchError> {
        let key = self.routing_key(ctx)?;
        let wire = payload.encode()?;
        let sessions = self.core().registry.sessions(self.kind(), &key);
        debug!(channel = %self.kind(), key = %key, session_count = sessions.len(), "broadcast");

        for session in sessions {
            if !session.send_text(wire.clone()) {
                warn!(
                    channel = %self.kind(),
                    key = %key,
                    socket_id = %session.id(),
                    "broadcast to session failed"
                );
            }
        }
        Ok(())
    }

    pub async fn receive(
        &self,
        session: &SessionHandle,
        ctx: &DispatchContext,
        raw: &str,
    ) -> Result<(), DispatchError> {
        match self {
            // Output-only channel: inbound client frames are ignored.
            Self::SystemNotification(_) => {
                debug!(user_id = %ctx.user_id, "ignoring inbound frame on system channel");
                Ok(())
            }

            Self::ProjectSelectedFiles(s) => {
                let project = ProjectId::from_raw(ctx.attr(ATTR_PROJECT_ID)?);
                if !s
                    .core
                    .participants
                    .is_project_member(&project, &ctx.user_id)
                    .await?
                {
                    return Err(self.deny(session, ctx, format!("project {project}")));
                }
                self.send(ctx, &Payload::text(raw)).await
            }

            Self::ConversationMessage(s) => {
                self.authorize_conversation(session, ctx).await?;

                let event: MessageEvent = serde_json::from_str(raw)?;
                if let Err(e) = s.messages.save_message(&event).await {
                    let _ = s.effects.try_send(InboundEffect::SystemNotice {
                        user_id: event.sender_id.clone(),
                        text: PROCESSING_FAILED_NOTICE.into(),
                    });
                    return Err(e);
                }

                if s.effects
                    .try_send(InboundEffect::NewMessage {
                        conversation_id: event.conversation_id.clone(),
                        sender_id: event.sender_id.clone(),
                        recipient: event.recipient,
                    })
                    .is_err()
                {
                    warn!(
                        conversation_id = %event.conversation_id,
                        "effect queue full, dropping fan-out"
                    );
                }

                self.send(ctx, &Payload::Message(event)).await
            }

            // Broadcast-back channels: gate on membership, then re-dispatch.
            _ => {
                self.authorize_conversation(session, ctx).await?;
                self.send(ctx, &Payload::text(raw)).await
            }
        }
    }

    async fn authorize_conversation(
        &self,
        session: &SessionHandle,
        ctx: &DispatchContext,
    ) -> Result<ConversationId, DispatchError> {
        let conversation = ConversationId::from_raw(ctx.attr(ATTR_CONVERSATION_ID)?);
        if self
            .core()
            .participants
            .is_participant(&conversation, &ctx.user_id)
            .await?
        {
            return Ok(conversation);
        }
        Err(self.deny(session, ctx, format!("conversation {conversation}")))
    }

    /// Notify the offending socket and end the connection with the policy
    /// close code. The connection handler logs the returned error; it is
    /// never rethrown into the transport.
    fn deny(&self, session: &SessionHandle, ctx: &DispatchContext, scope: String) -> DispatchError {
        warn!(
            channel = %self.kind(),
            user_id = %ctx.user_id,
            scope = %scope,
            "inbound frame from non-participant"
        );
        session.send_text(DENIAL_NOTICE);
        session.close(CLOSE_POLICY_VIOLATION, "not a participant");
        DispatchError::Forbidden {
            user_id: ctx.user_id.clone(),
            scope,
        }
    }
}
