use chrono::Utc;
use tracing::instrument;

use courier_core::ids::{ConversationId, ProjectId, UserId};
use courier_core::outbox::DomainEvent;

use crate::database::Database;
use crate::error::StoreError;
use crate::outbox::OutboxRepo;

/// A stored conversation row.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub id: ConversationId,
    pub project_id: Option<ProjectId>,
    pub title: String,
    pub created_at: String,
}

pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        project_id: Option<&ProjectId>,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        let id = ConversationId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, project_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), project_id.map(|p| p.as_str()), title, now],
            )?;
            Ok(())
        })?;
        Ok(Conversation {
            id,
            project_id: project_id.cloned(),
            title: title.to_owned(),
            created_at: now,
        })
    }

    /// Look up a live (not soft-deleted) conversation.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, project_id, title, created_at FROM conversations
                 WHERE id = ?1 AND deleted_at IS NULL",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let project: Option<String> = row.get(1)?;
                    Ok(Some(Conversation {
                        id: ConversationId::from_raw(row.get::<_, String>(0)?),
                        project_id: project.map(ProjectId::from_raw),
                        title: row.get(2)?,
                        created_at: row.get(3)?,
                    }))
                }
                None => Ok(None),
            }
        })
    }

    /// Soft-delete a conversation and enqueue its cleanup event in the same
    /// transaction, so the broker notification can never outrun or miss the
    /// deletion.
    #[instrument(skip(self), fields(conversation_id = %id, user_id = %user))]
    pub fn delete_with_cleanup(
        &self,
        id: &ConversationId,
        user: &UserId,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let event = DomainEvent::ConversationCleanup {
            conversation_id: id.clone(),
            user_id: user.clone(),
            occurred_at: now,
        };
        self.db.transaction(|tx| {
            let updated = tx.execute(
                "UPDATE conversations SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                rusqlite::params![now.to_rfc3339(), id.as_str()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            OutboxRepo::append(tx, &event)?;
            Ok(())
        })
    }
}
