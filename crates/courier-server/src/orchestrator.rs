use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, warn};

use courier_ai::AiClient;
use courier_core::channel::ChannelKind;
use courier_core::context::{DispatchContext, ATTR_CONVERSATION_ID};
use courier_core::errors::AiError;
use courier_core::ids::ConversationId;
use courier_core::message::{ai_sender, MessageEvent, AI_FALLBACK_NOTICE, END_OF_STREAM_TOKEN};
use courier_dispatch::{DispatchError, Dispatcher, MessageStore, Payload};
use courier_store::conversations::Conversation;

use crate::adapters::StoreBridge;
use crate::notify::Notifier;

/// Manages one AI response turn end-to-end: rendezvous with the client's
/// token socket, relay the stream live, persist the final text, and unwind
/// cleanly on every exit path.
pub struct AiStreamingOrchestrator {
    dispatcher: Arc<Dispatcher>,
    ai: Arc<dyn AiClient>,
    store: Arc<StoreBridge>,
    notifier: Arc<Notifier>,
}

#[derive(Debug, thiserror::Error)]
enum AiTurnError {
    #[error(transparent)]
    Ai(#[from] AiError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl AiStreamingOrchestrator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        ai: Arc<dyn AiClient>,
        store: Arc<StoreBridge>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            dispatcher,
            ai,
            store,
            notifier,
        }
    }

    /// Errors never escape this method: an AI failure degrades to the fixed
    /// fallback notice, and finalization (stop request + end sentinel) runs
    /// unconditionally, including when the surrounding task is cancelled.
    pub async fn handle_ai_response(&self, conversation_id: &ConversationId) {
        debug!(conversation_id = %conversation_id, "AI response turn starting");

        let conversation = match self.store.find_conversation(conversation_id).await {
            Ok(Some(conversation)) => conversation,
            Ok(None) => {
                // The triggering event may be stale; nothing to do.
                debug!(conversation_id = %conversation_id, "conversation absent, ignoring trigger");
                return;
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "conversation lookup failed");
                return;
            }
        };

        let ctx = DispatchContext::new(ai_sender())
            .with(ATTR_CONVERSATION_ID, conversation_id.as_str());

        if !self
            .dispatcher
            .is_ready(ChannelKind::AiTokenStream, &ctx)
            .await
        {
            warn!(conversation_id = %conversation_id, "no ready token consumer, aborting stream");
            return;
        }

        // From here on, the stop request and the end sentinel must reach the
        // AI service and the socket no matter how this turn ends.
        let _finalizer = StreamFinalizer {
            dispatcher: self.dispatcher.clone(),
            ai: self.ai.clone(),
            ctx: ctx.clone(),
            conversation_id: conversation_id.clone(),
        };

        match self.stream_and_persist(&conversation, &ctx).await {
            Ok(()) => {
                debug!(conversation_id = %conversation_id, "AI response persisted");
            }
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "AI response failed, sending fallback notice");
                self.notifier
                    .notify_conversation(conversation_id, AI_FALLBACK_NOTICE)
                    .await;
            }
        }
    }

    async fn stream_and_persist(
        &self,
        conversation: &Conversation,
        ctx: &DispatchContext,
    ) -> Result<(), AiTurnError> {
        let mut stream = self
            .ai
            .stream_tokens(&conversation.id, conversation.project_id.as_ref())
            .await?;

        let mut tokens: Vec<String> = Vec::new();
        while let Some(item) = stream.next().await {
            let token = item?;
            // Readiness was proven before the stream opened.
            self.dispatcher
                .send_unchecked(
                    ChannelKind::AiTokenStream,
                    ctx,
                    &Payload::text(token.clone()),
                )
                .await?;
            tokens.push(token);
        }

        let text: String = tokens
            .iter()
            .filter(|token| token.as_str() != END_OF_STREAM_TOKEN)
            .map(String::as_str)
            .collect();

        let event = MessageEvent::ai_text(conversation.id.clone(), text);
        self.store.save_message(&event).await?;
        self.notifier
            .notify_new_message(&conversation.id, &event.sender_id)
            .await;
        Ok(())
    }
}

/// Finalization guard: asks the AI service to stop generating and emits the
/// end-of-stream sentinel so the client can close its UI affordance. Drop
/// runs on success, error, and task cancellation alike; the work is spawned
/// because Drop cannot await.
struct StreamFinalizer {
    dispatcher: Arc<Dispatcher>,
    ai: Arc<dyn AiClient>,
    ctx: DispatchContext,
    conversation_id: ConversationId,
}

impl Drop for StreamFinalizer {
    fn drop(&mut self) {
        let dispatcher = self.dispatcher.clone();
        let ai = self.ai.clone();
        let ctx = self.ctx.clone();
        let conversation_id = self.conversation_id.clone();
        tokio::spawn(async move {
            if let Err(e) = ai.stop(&conversation_id).await {
                warn!(conversation_id = %conversation_id, error = %e, "stop request failed");
            }
            if let Err(e) = dispatcher
                .send_unchecked(
                    ChannelKind::AiTokenStream,
                    &ctx,
                    &Payload::text(END_OF_STREAM_TOKEN),
                )
                .await
            {
                warn!(conversation_id = %conversation_id, error = %e, "end sentinel emit failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestStack;
    use courier_ai::mock::{MockAiClient, MockAiResponse};
    use courier_core::context::ATTR_CONVERSATION_ID;
    use courier_core::ids::UserId;
    use courier_core::message::AI_SENDER_ID;
    use courier_dispatch::registry::SessionMessage;
    use courier_dispatch::SessionHandle;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn orchestrator(stack: &TestStack, ai: Arc<MockAiClient>) -> AiStreamingOrchestrator {
        AiStreamingOrchestrator::new(
            stack.dispatcher.clone(),
            ai,
            stack.bridge.clone(),
            stack.notifier.clone(),
        )
    }

    async fn connect_token_socket(
        stack: &TestStack,
        user: &str,
        conversation: &ConversationId,
    ) -> (SessionHandle, mpsc::Receiver<SessionMessage>) {
        let (session, rx) = SessionHandle::channel(32);
        let ctx = DispatchContext::new(UserId::from_raw(user))
            .with(ATTR_CONVERSATION_ID, conversation.as_str());
        stack
            .dispatcher
            .register(ChannelKind::AiTokenStream, &session, &ctx)
            .await
            .unwrap();
        (session, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<SessionMessage>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let SessionMessage::Text(text) = frame {
                frames.push(text);
            }
        }
        frames
    }

    /// Let spawned finalizer tasks run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn relays_tokens_persists_joined_text_and_finalizes() {
        let stack = TestStack::new().await;
        let conversation = stack.create_conversation("turn");
        let ai = Arc::new(MockAiClient::new(vec![MockAiResponse::tokens([
            "The", " answer", " is", " 42", "[DONE]",
        ])]));
        let orchestrator = orchestrator(&stack, ai.clone());

        let (_session, mut rx) = connect_token_socket(&stack, "user_7", &conversation.id).await;

        orchestrator.handle_ai_response(&conversation.id).await;
        settle().await;

        // Sentinel excluded from the persisted text.
        let messages = stack.messages(&conversation.id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "The answer is 42");
        assert_eq!(messages[0].sender_id.as_str(), AI_SENDER_ID);

        // Live relay preserved order; the finalizer's sentinel arrives after
        // everything else, once persistence has completed.
        let frames = drain(&mut rx);
        assert_eq!(
            frames,
            vec!["The", " answer", " is", " 42", "[DONE]", "[DONE]"]
        );

        // Best-effort stop reached the AI service.
        assert_eq!(ai.stop_calls(), vec![conversation.id.clone()]);
    }

    #[tokio::test]
    async fn no_ready_socket_means_no_stream_and_no_message() {
        let stack = TestStack::new().await;
        let conversation = stack.create_conversation("nobody home");
        let ai = Arc::new(MockAiClient::new(vec![MockAiResponse::tokens(["unused"])]));
        let orchestrator = orchestrator(&stack, ai.clone());

        orchestrator.handle_ai_response(&conversation.id).await;
        settle().await;

        assert_eq!(ai.call_count(), 0);
        assert!(stack.messages(&conversation.id).is_empty());
        assert!(ai.stop_calls().is_empty());
    }

    #[tokio::test]
    async fn absent_conversation_terminates_silently() {
        let stack = TestStack::new().await;
        let ai = Arc::new(MockAiClient::new(vec![]));
        let orchestrator = orchestrator(&stack, ai.clone());

        orchestrator
            .handle_ai_response(&ConversationId::from_raw("conv_stale"))
            .await;
        settle().await;

        assert_eq!(ai.call_count(), 0);
        assert!(ai.stop_calls().is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_broadcasts_fallback_and_still_finalizes() {
        let stack = TestStack::new().await;
        let conversation = stack.create_conversation("flaky");
        let ai = Arc::new(MockAiClient::new(vec![MockAiResponse::Error(
            AiError::Overloaded,
        )]));
        let orchestrator = orchestrator(&stack, ai.clone());

        let (_token_session, mut token_rx) =
            connect_token_socket(&stack, "user_7", &conversation.id).await;

        // user_7 also listens on the notification channel.
        stack
            .participants
            .add(&conversation.id, &UserId::from_raw("user_7"))
            .await
            .unwrap();
        let (notify_session, mut notify_rx) = SessionHandle::channel(8);
        let notify_ctx = DispatchContext::new(UserId::from_raw("user_7"))
            .with(ATTR_CONVERSATION_ID, conversation.id.as_str());
        stack
            .dispatcher
            .register(
                ChannelKind::ConversationUserNotification,
                &notify_session,
                &notify_ctx,
            )
            .await
            .unwrap();

        orchestrator.handle_ai_response(&conversation.id).await;
        settle().await;

        assert!(stack.messages(&conversation.id).is_empty());
        assert_eq!(
            notify_rx.try_recv().unwrap(),
            SessionMessage::Text(AI_FALLBACK_NOTICE.into())
        );

        // Finalization ran: sentinel on the token socket, stop on the service.
        assert_eq!(drain(&mut token_rx), vec![END_OF_STREAM_TOKEN]);
        assert_eq!(ai.stop_calls().len(), 1);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_tokens_unpersisted() {
        let stack = TestStack::new().await;
        let conversation = stack.create_conversation("interrupted");
        let ai = Arc::new(MockAiClient::new(vec![MockAiResponse::TokensThenError(
            vec!["partial".into()],
            AiError::StreamInterrupted("cut".into()),
        )]));
        let orchestrator = orchestrator(&stack, ai.clone());

        let (_session, mut rx) = connect_token_socket(&stack, "user_7", &conversation.id).await;

        orchestrator.handle_ai_response(&conversation.id).await;
        settle().await;

        // The partial token was relayed live, but nothing was persisted.
        let frames = drain(&mut rx);
        assert_eq!(frames, vec!["partial", END_OF_STREAM_TOKEN]);
        assert!(stack.messages(&conversation.id).is_empty());
        assert_eq!(ai.stop_calls().len(), 1);
    }

    #[tokio::test]
    async fn failing_stop_request_is_swallowed() {
        let stack = TestStack::new().await;
        let conversation = stack.create_conversation("stubborn");
        let ai = Arc::new(
            MockAiClient::new(vec![MockAiResponse::tokens(["ok", "[DONE]"])])
                .with_failing_stop(),
        );
        let orchestrator = orchestrator(&stack, ai.clone());

        let (_session, mut rx) = connect_token_socket(&stack, "user_7", &conversation.id).await;

        orchestrator.handle_ai_response(&conversation.id).await;
        settle().await;

        // Stop failed, the sentinel still went out and the turn persisted.
        assert_eq!(stack.messages(&conversation.id).len(), 1);
        let frames = drain(&mut rx);
        assert_eq!(frames.last().map(String::as_str), Some(END_OF_STREAM_TOKEN));
        assert_eq!(ai.stop_calls().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_still_finalizes() {
        let stack = TestStack::new().await;
        let conversation = stack.create_conversation("cancelled");
        // A long delay before the second token keeps the turn in-flight
        // while we abort it.
        let ai = Arc::new(MockAiClient::new(vec![MockAiResponse::delayed(
            Duration::from_secs(60),
            MockAiResponse::tokens(["never"]),
        )]));
        let orchestrator = Arc::new(orchestrator(&stack, ai.clone()));

        let (_session, mut rx) = connect_token_socket(&stack, "user_7", &conversation.id).await;

        let conv = conversation.id.clone();
        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.handle_ai_response(&conv).await })
        };
        // Give the turn time to pass the rendezvous and enter the stream.
        tokio::time::sleep(Duration::from_millis(100)).await;
        running.abort();
        settle().await;

        // The guard fired on cancellation: stop + sentinel, no message.
        assert_eq!(ai.stop_calls().len(), 1);
        assert_eq!(drain(&mut rx), vec![END_OF_STREAM_TOKEN]);
        assert!(stack.messages(&conversation.id).is_empty());
    }
}
