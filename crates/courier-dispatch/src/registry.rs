use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use courier_core::channel::ChannelKind;
use courier_core::ids::SocketId;

/// WebSocket close code for authorization failures. Distinguishable from a
/// normal 1000 closure on the client side.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Default bound of a session's outbound frame queue.
pub const DEFAULT_SEND_QUEUE: usize = 256;

/// A frame queued for one socket's writer task.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionMessage {
    Text(String),
    Close { code: u16, reason: String },
}

/// Send side of one live socket connection. Cheap to clone; the writer task
/// owns the receiving end and drains frames to the wire.
#[derive(Clone)]
pub struct SessionHandle {
    id: SocketId,
    tx: mpsc::Sender<SessionMessage>,
}

impl SessionHandle {
    /// Create a handle plus the receiver its writer task drains.
    pub fn channel(queue_size: usize) -> (Self, mpsc::Receiver<SessionMessage>) {
        let (tx, rx) = mpsc::channel(queue_size);
        (
            Self {
                id: SocketId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> &SocketId {
        &self.id
    }

    /// Queue a text frame. Never blocks: a full queue drops the frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        match self.tx.try_send(SessionMessage::Text(text.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                if let SessionMessage::Text(text) = msg {
                    warn!(
                        socket_id = %self.id,
                        frame_len = text.len(),
                        "send queue full, dropping frame"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a close frame. The writer task shuts the socket after sending it.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .try_send(SessionMessage::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Process-local table of live socket connections, keyed by
/// (channel kind, routing key). Contention is scoped to one bucket;
/// a bucket whose last session leaves is pruned immediately.
pub struct SessionRegistry {
    buckets: DashMap<(ChannelKind, String), HashMap<SocketId, SessionHandle>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    pub fn register(&self, kind: ChannelKind, key: &str, session: SessionHandle) {
        self.buckets
            .entry((kind, key.to_owned()))
            .or_default()
            .insert(session.id().clone(), session);
    }

    /// Snapshot of the sessions under one routing key.
    pub fn sessions(&self, kind: ChannelKind, key: &str) -> Vec<SessionHandle> {
        self.buckets
            .get(&(kind, key.to_owned()))
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, kind: ChannelKind, key: &str, socket_id: &SocketId) {
        if let Entry::Occupied(mut entry) = self.buckets.entry((kind, key.to_owned())) {
            entry.get_mut().remove(socket_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    pub fn count(&self, kind: ChannelKind, key: &str) -> usize {
        self.buckets
            .get(&(kind, key.to_owned()))
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    /// Live session count across every routing key. Observability only.
    pub fn total_sessions(&self) -> usize {
        self.buckets.iter().map(|entry| entry.value().len()).sum()
    }

    /// Live session count for one channel kind. Observability only.
    pub fn sessions_for_kind(&self, kind: ChannelKind) -> usize {
        self.buckets
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Number of live routing-key buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
