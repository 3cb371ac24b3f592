use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use courier_core::ids::ConversationId;
use courier_core::message::MessageEvent;
use courier_dispatch::strategy::InboundEffect;
use courier_dispatch::{
    Dispatcher, DispatcherConfig, InMemorySharedStore, ParticipantCoordinator, ReadinessConfig,
    ReadinessCoordinator, SessionRegistry,
};
use courier_store::conversations::{Conversation, ConversationRepo};
use courier_store::messages::MessageRepo;
use courier_store::Database;

use crate::adapters::StoreBridge;
use crate::notify::Notifier;

/// Fully wired dispatch stack over an in-memory database and shared store.
pub(crate) struct TestStack {
    pub db: Database,
    pub bridge: Arc<StoreBridge>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<SessionRegistry>,
    pub participants: Arc<ParticipantCoordinator>,
    pub notifier: Arc<Notifier>,
    pub effects_tx: mpsc::Sender<InboundEffect>,
    pub effects_rx: mpsc::Receiver<InboundEffect>,
}

impl TestStack {
    pub async fn new() -> Self {
        Self::with_config(DispatcherConfig {
            ready_poll_interval: Duration::from_millis(25),
            ready_timeout: Duration::from_millis(500),
        })
        .await
    }

    pub async fn with_config(config: DispatcherConfig) -> Self {
        let db = Database::in_memory().expect("in-memory db");
        let bridge = Arc::new(StoreBridge::new(db.clone()));
        let shared = Arc::new(InMemorySharedStore::new());
        let registry = Arc::new(SessionRegistry::new());
        let readiness = Arc::new(ReadinessCoordinator::new(
            shared.clone(),
            ReadinessConfig::default(),
        ));
        let participants = Arc::new(ParticipantCoordinator::new(shared, bridge.clone()));
        let (effects_tx, effects_rx) = mpsc::channel(64);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            readiness,
            participants.clone(),
            bridge.clone(),
            effects_tx.clone(),
            config,
        ));
        let notifier = Arc::new(Notifier::new(dispatcher.clone(), participants.clone()));
        Self {
            db,
            bridge,
            dispatcher,
            registry,
            participants,
            notifier,
            effects_tx,
            effects_rx,
        }
    }

    pub fn create_conversation(&self, title: &str) -> Conversation {
        ConversationRepo::new(self.db.clone())
            .create(None, title)
            .expect("create conversation")
    }

    pub fn messages(&self, conversation: &ConversationId) -> Vec<MessageEvent> {
        MessageRepo::new(self.db.clone())
            .list_recent(conversation, 100)
            .expect("list messages")
    }
}
