use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use courier_core::channel::ChannelKind;
use courier_core::context::DispatchContext;
use courier_core::ids::UserId;
use courier_dispatch::registry::SessionMessage;
use courier_dispatch::{DispatchError, Dispatcher, SessionHandle, CLOSE_POLICY_VIOLATION};

/// Drive one upgraded socket: identity gate, registration, frame pumping,
/// and a deregistration that survives every exit path.
pub async fn handle_socket(
    socket: WebSocket,
    kind: ChannelKind,
    path_user: UserId,
    authenticated: Option<UserId>,
    ctx: DispatchContext,
    dispatcher: Arc<Dispatcher>,
    send_queue: usize,
) {
    let mut socket = socket;

    // The path's {userId} must match the identity the gateway authenticated.
    let identity_ok = authenticated.as_ref() == Some(&path_user);
    if !identity_ok {
        warn!(
            channel = %kind,
            path_user = %path_user,
            authenticated = authenticated.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
            "identity mismatch, closing"
        );
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "user identity mismatch".into(),
            })))
            .await;
        return;
    }

    let (session, mut frames_rx) = SessionHandle::channel(send_queue);
    if let Err(e) = dispatcher.register(kind, &session, &ctx).await {
        warn!(channel = %kind, user_id = %ctx.user_id, error = %e, "registration failed, closing");
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }
    info!(channel = %kind, user_id = %ctx.user_id, socket_id = %session.id(), "socket connected");

    // Registry entries must never outlive a closed socket, however this
    // function ends; the guard covers abrupt cancellation.
    let mut guard = DeregisterGuard::armed(dispatcher.clone(), kind, session.clone(), ctx.clone());

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain queued frames onto the wire. Ends on socket error or on
    // an explicit close frame.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            match frame {
                SessionMessage::Text(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                SessionMessage::Close { code, reason } => {
                    let _ = ws_tx
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Reader: feed inbound text frames to the dispatcher.
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            WsMessage::Text(text) => {
                match dispatcher.receive(kind, &session, &ctx, text.as_str()).await {
                    Ok(()) => {}
                    Err(DispatchError::Forbidden { .. }) => {
                        // The strategy already queued the denial and close
                        // frames; end the read loop.
                        break;
                    }
                    Err(DispatchError::Serialization(e)) => {
                        // Reject the single frame; the connection stays open.
                        debug!(channel = %kind, error = %e, "dropping malformed frame");
                    }
                    Err(e) => {
                        warn!(channel = %kind, user_id = %ctx.user_id, error = %e, "inbound frame failed");
                    }
                }
            }
            WsMessage::Close(_) => break,
            // axum answers pings automatically.
            _ => {}
        }
    }

    guard.disarm();
    if let Err(e) = dispatcher.deregister(kind, &session, &ctx).await {
        warn!(channel = %kind, user_id = %ctx.user_id, error = %e, "deregistration failed");
    }
    info!(channel = %kind, user_id = %ctx.user_id, socket_id = %session.id(), "socket disconnected");
    writer.abort();
}

/// Spawns the deregistration if the connection future is dropped before the
/// orderly path runs.
struct DeregisterGuard {
    inner: Option<(Arc<Dispatcher>, ChannelKind, SessionHandle, DispatchContext)>,
}

impl DeregisterGuard {
    fn armed(
        dispatcher: Arc<Dispatcher>,
        kind: ChannelKind,
        session: SessionHandle,
        ctx: DispatchContext,
    ) -> Self {
        Self {
            inner: Some((dispatcher, kind, session, ctx)),
        }
    }

    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for DeregisterGuard {
    fn drop(&mut self) {
        if let Some((dispatcher, kind, session, ctx)) = self.inner.take() {
            tokio::spawn(async move {
                if let Err(e) = dispatcher.deregister(kind, &session, &ctx).await {
                    warn!(channel = %kind, user_id = %ctx.user_id, error = %e, "guarded deregistration failed");
                }
            });
        }
    }
}
