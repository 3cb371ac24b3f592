use async_trait::async_trait;

use courier_core::ids::{ConversationId, ProjectId, UserId};
use courier_core::message::MessageEvent;
use courier_dispatch::{DispatchError, MembershipAuthority, MessageStore};
use courier_store::conversations::{Conversation, ConversationRepo};
use courier_store::messages::MessageRepo;
use courier_store::participants::ParticipantRepo;
use courier_store::{Database, StoreError};

/// Store-backed implementations of the dispatch layer's collaborator traits.
/// rusqlite is synchronous, so every call hops to the blocking pool to keep
/// the dispatch path non-blocking.
pub struct StoreBridge {
    db: Database,
}

impl StoreBridge {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let db = self.db.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || ConversationRepo::new(db).find(&id))
            .await
            .map_err(|e| StoreError::Database(format!("lookup task: {e}")))?
    }
}

#[async_trait]
impl MessageStore for StoreBridge {
    async fn save_message(&self, event: &MessageEvent) -> Result<(), DispatchError> {
        let db = self.db.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || MessageRepo::new(db).save(&event))
            .await
            .map_err(|e| DispatchError::Storage(format!("save task: {e}")))?
            .map_err(|e| DispatchError::Storage(e.to_string()))
    }
}

#[async_trait]
impl MembershipAuthority for StoreBridge {
    async fn is_conversation_participant(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<bool, DispatchError> {
        let db = self.db.clone();
        let conversation = conversation.clone();
        let user = user.clone();
        tokio::task::spawn_blocking(move || {
            ParticipantRepo::new(db).is_participant(&conversation, &user)
        })
        .await
        .map_err(|e| DispatchError::Storage(format!("membership task: {e}")))?
        .map_err(|e| DispatchError::Storage(e.to_string()))
    }

    async fn is_project_member(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<bool, DispatchError> {
        let db = self.db.clone();
        let project = project.clone();
        let user = user.clone();
        tokio::task::spawn_blocking(move || {
            ParticipantRepo::new(db).is_project_member(&project, &user)
        })
        .await
        .map_err(|e| DispatchError::Storage(format!("membership task: {e}")))?
        .map_err(|e| DispatchError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn find_conversation_passes_through() {
        let db = Database::in_memory().unwrap();
        let conv = ConversationRepo::new(db.clone()).create(None, "t").unwrap();
        let bridge = StoreBridge::new(db);

        let found = bridge.find_conversation(&conv.id).await.unwrap();
        assert_eq!(found.unwrap().id, conv.id);
        assert!(bridge
            .find_conversation(&ConversationId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn save_message_persists() {
        let db = Database::in_memory().unwrap();
        let conv = ConversationRepo::new(db.clone()).create(None, "t").unwrap();
        let bridge = StoreBridge::new(db.clone());

        let event = MessageEvent::ai_text(conv.id.clone(), "stored");
        bridge.save_message(&event).await.unwrap();

        let listed = MessageRepo::new(db).list_recent(&conv.id, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "stored");
    }

    #[tokio::test]
    async fn membership_consults_the_store() {
        let db = Database::in_memory().unwrap();
        let conv = ConversationId::from_raw("conv_1");
        let user = UserId::from_raw("user_1");
        ParticipantRepo::new(db.clone()).add(&conv, &user).unwrap();
        let bridge = StoreBridge::new(db);

        assert!(bridge
            .is_conversation_participant(&conv, &user)
            .await
            .unwrap());
        assert!(!bridge
            .is_conversation_participant(&conv, &UserId::from_raw("user_2"))
            .await
            .unwrap());
    }
}
