use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use courier_core::channel::ChannelKind;
use courier_core::context::DispatchContext;

use crate::error::DispatchError;
use crate::participants::ParticipantCoordinator;
use crate::readiness::ReadinessCoordinator;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::strategy::{
    AiTokenStrategy, ChannelStrategy, ConversationMessageStrategy, GroupNotificationStrategy,
    InboundEffect, MessageStore, Payload, ProjectSelectedFilesStrategy, StrategyCore,
    SystemNotificationStrategy, UserNotificationStrategy,
};

/// Rendezvous policy: how often to re-check readiness and how long before
/// the wait is abandoned.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ready_poll_interval: Duration::from_millis(250),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Fixed ChannelKind → strategy mapping, built once at startup.
struct StrategyTable {
    ai_token: ChannelStrategy,
    conversation_message: ChannelStrategy,
    user_notification: ChannelStrategy,
    group_notification: ChannelStrategy,
    system_notification: ChannelStrategy,
    project_selected_files: ChannelStrategy,
}

impl StrategyTable {
    fn get(&self, kind: ChannelKind) -> &ChannelStrategy {
        match kind {
            ChannelKind::AiTokenStream => &self.ai_token,
            ChannelKind::ConversationMessage => &self.conversation_message,
            ChannelKind::ConversationUserNotification => &self.user_notification,
            ChannelKind::ConversationGroupNotification => &self.group_notification,
            ChannelKind::SystemNotification => &self.system_notification,
            ChannelKind::ProjectSelectedFiles => &self.project_selected_files,
        }
    }
}

/// Single entry point for every channel operation. Owns no state of its own;
/// routes to the strategy for the channel kind.
pub struct Dispatcher {
    table: StrategyTable,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        readiness: Arc<ReadinessCoordinator>,
        participants: Arc<ParticipantCoordinator>,
        messages: Arc<dyn MessageStore>,
        effects: mpsc::Sender<InboundEffect>,
        config: DispatcherConfig,
    ) -> Self {
        let core = StrategyCore {
            registry,
            readiness,
            participants,
        };
        let table = StrategyTable {
            ai_token: ChannelStrategy::AiToken(AiTokenStrategy { core: core.clone() }),
            conversation_message: ChannelStrategy::ConversationMessage(
                ConversationMessageStrategy {
                    core: core.clone(),
                    messages,
                    effects,
                },
            ),
            user_notification: ChannelStrategy::UserNotification(UserNotificationStrategy {
                core: core.clone(),
            }),
            group_notification: ChannelStrategy::GroupNotification(GroupNotificationStrategy {
                core: core.clone(),
            }),
            system_notification: ChannelStrategy::SystemNotification(SystemNotificationStrategy {
                core: core.clone(),
            }),
            project_selected_files: ChannelStrategy::ProjectSelectedFiles(
                ProjectSelectedFilesStrategy { core },
            ),
        };
        Self { table, config }
    }

    pub async fn register(
        &self,
        kind: ChannelKind,
        session: &SessionHandle,
        ctx: &DispatchContext,
    ) -> Result<(), DispatchError> {
        self.table.get(kind).register(session, ctx).await
    }

    pub async fn deregister(
        &self,
        kind: ChannelKind,
        session: &SessionHandle,
        ctx: &DispatchContext,
    ) -> Result<(), DispatchError> {
        self.table.get(kind).deregister(session, ctx).await
    }

    /// Bounded readiness rendezvous: re-check at a fixed interval until the
    /// flag appears or the timeout elapses. Dropping the returned future
    /// (caller cancellation) stops the polling promptly.
    pub async fn is_ready(&self, kind: ChannelKind, ctx: &DispatchContext) -> bool {
        let strategy = self.table.get(kind);
        let deadline = tokio::time::Instant::now() + self.config.ready_timeout;

        loop {
            match strategy.is_ready(ctx).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(channel = %kind, error = %e, "readiness check failed");
                    return false;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(
                    channel = %kind,
                    timeout_secs = self.config.ready_timeout.as_secs(),
                    "readiness rendezvous timed out"
                );
                return false;
            }
            tokio::time::sleep(self.config.ready_poll_interval).await;
        }
    }

    /// Readiness-gated send: one check, fail fast when no consumer is
    /// listening.
    pub async fn send(
        &self,
        kind: ChannelKind,
        ctx: &DispatchContext,
        payload: &Payload,
    ) -> Result<(), DispatchError> {
        let strategy = self.table.get(kind);
        if !strategy.is_ready(ctx).await? {
            let key = strategy.routing_key(ctx)?;
            return Err(DispatchError::NotReady { kind, key });
        }
        strategy.send(ctx, payload).await
    }

    /// Send skipping the readiness check. Only for callers that already
    /// rendezvoused via `is_ready` and want to avoid the extra round trip.
    pub async fn send_unchecked(
        &self,
        kind: ChannelKind,
        ctx: &DispatchContext,
        payload: &Payload,
    ) -> Result<(), DispatchError> {
        self.table.get(kind).send(ctx, payload).await
    }

    pub async fn receive(
        &self,
        kind: ChannelKind,
        session: &SessionHandle,
        ctx: &DispatchContext,
        raw: &str,
    ) -> Result<(), DispatchError> {
        self.table.get(kind).receive(session, ctx, raw).await
    }
}
