use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use courier_core::message::Recipient;
use courier_dispatch::strategy::InboundEffect;

use crate::notify::Notifier;
use crate::orchestrator::AiStreamingOrchestrator;

/// Drain follow-on work queued by the receive pipeline. Notification fan-out
/// runs inline; AI turns are spawned so a long stream never stalls the queue.
pub fn spawn_effect_worker(
    mut rx: mpsc::Receiver<InboundEffect>,
    notifier: Arc<Notifier>,
    orchestrator: Arc<AiStreamingOrchestrator>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(effect) = rx.recv().await {
            match effect {
                InboundEffect::NewMessage {
                    conversation_id,
                    sender_id,
                    recipient,
                } => {
                    notifier
                        .notify_new_message(&conversation_id, &sender_id)
                        .await;
                    if recipient == Recipient::Ai {
                        let orchestrator = orchestrator.clone();
                        tokio::spawn(async move {
                            orchestrator.handle_ai_response(&conversation_id).await;
                        });
                    }
                }
                InboundEffect::SystemNotice { user_id, text } => {
                    notifier.notify_user(&user_id, &text).await;
                }
            }
        }
        debug!("effect worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestStack;
    use courier_ai::mock::{MockAiClient, MockAiResponse};
    use courier_core::channel::ChannelKind;
    use courier_core::context::{DispatchContext, ATTR_CONVERSATION_ID};
    use courier_core::ids::UserId;
    use courier_core::message::AI_SENDER_ID;
    use courier_dispatch::registry::SessionMessage;
    use courier_dispatch::SessionHandle;
    use std::time::Duration;

    #[tokio::test]
    async fn system_notice_effect_reaches_the_user() {
        let mut stack = TestStack::new().await;
        let effects_rx = std::mem::replace(&mut stack.effects_rx, tokio::sync::mpsc::channel(1).1);

        let ai = Arc::new(MockAiClient::new(vec![]));
        let orchestrator = Arc::new(AiStreamingOrchestrator::new(
            stack.dispatcher.clone(),
            ai,
            stack.bridge.clone(),
            stack.notifier.clone(),
        ));
        let _worker = spawn_effect_worker(effects_rx, stack.notifier.clone(), orchestrator);

        let (session, mut rx) = SessionHandle::channel(8);
        let ctx = DispatchContext::new(UserId::from_raw("user_1"));
        stack
            .dispatcher
            .register(ChannelKind::SystemNotification, &session, &ctx)
            .await
            .unwrap();

        stack
            .effects_tx
            .send(InboundEffect::SystemNotice {
                user_id: UserId::from_raw("user_1"),
                text: "ping".into(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.try_recv().unwrap(), SessionMessage::Text("ping".into()));
    }

    #[tokio::test]
    async fn ai_recipient_triggers_a_streaming_turn() {
        let mut stack = TestStack::new().await;
        let effects_rx = std::mem::replace(&mut stack.effects_rx, tokio::sync::mpsc::channel(1).1);

        let conversation = stack.create_conversation("ai turn");
        let ai = Arc::new(MockAiClient::new(vec![MockAiResponse::tokens([
            "hi", "[DONE]",
        ])]));
        let orchestrator = Arc::new(AiStreamingOrchestrator::new(
            stack.dispatcher.clone(),
            ai.clone(),
            stack.bridge.clone(),
            stack.notifier.clone(),
        ));
        let _worker = spawn_effect_worker(effects_rx, stack.notifier.clone(), orchestrator);

        // A token consumer is listening.
        let (session, _rx) = SessionHandle::channel(32);
        let ctx = DispatchContext::new(UserId::from_raw("user_7"))
            .with(ATTR_CONVERSATION_ID, conversation.id.as_str());
        stack
            .dispatcher
            .register(ChannelKind::AiTokenStream, &session, &ctx)
            .await
            .unwrap();

        stack
            .effects_tx
            .send(InboundEffect::NewMessage {
                conversation_id: conversation.id.clone(),
                sender_id: UserId::from_raw("user_7"),
                recipient: courier_core::message::Recipient::Ai,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let messages = stack.messages(&conversation.id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[0].sender_id.as_str(), AI_SENDER_ID);
        assert_eq!(ai.call_count(), 1);
    }

    #[tokio::test]
    async fn users_recipient_does_not_touch_the_ai() {
        let mut stack = TestStack::new().await;
        let effects_rx = std::mem::replace(&mut stack.effects_rx, tokio::sync::mpsc::channel(1).1);

        let conversation = stack.create_conversation("humans only");
        let ai = Arc::new(MockAiClient::new(vec![]));
        let orchestrator = Arc::new(AiStreamingOrchestrator::new(
            stack.dispatcher.clone(),
            ai.clone(),
            stack.bridge.clone(),
            stack.notifier.clone(),
        ));
        let _worker = spawn_effect_worker(effects_rx, stack.notifier.clone(), orchestrator);

        stack
            .effects_tx
            .send(InboundEffect::NewMessage {
                conversation_id: conversation.id.clone(),
                sender_id: UserId::from_raw("user_1"),
                recipient: courier_core::message::Recipient::Users,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ai.call_count(), 0);
    }
}
