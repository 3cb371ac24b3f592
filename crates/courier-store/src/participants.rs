use chrono::Utc;
use tracing::instrument;

use courier_core::ids::{ConversationId, ProjectId, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// Authoritative membership records. The dispatch layer keeps a cross-process
/// cache in front of this repo and falls back here on cache miss.
pub struct ParticipantRepo {
    db: Database,
}

impl ParticipantRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn add(&self, conversation: &ConversationId, user: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO participants (conversation_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![conversation.as_str(), user.as_str(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, conversation: &ConversationId, user: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation.as_str(), user.as_str()],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation, user_id = %user))]
    pub fn is_participant(
        &self,
        conversation: &ConversationId,
        user: &UserId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM participants WHERE conversation_id = ?1 AND user_id = ?2",
                rusqlite::params![conversation.as_str(), user.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn participants(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT user_id FROM participants WHERE conversation_id = ?1")?;
            let mut rows = stmt.query([conversation.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(UserId::from_raw(row.get::<_, String>(0)?));
            }
            Ok(out)
        })
    }

    pub fn add_project_member(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO project_members (project_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![project.as_str(), user.as_str(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    pub fn is_project_member(
        &self,
        project: &ProjectId,
        user: &UserId,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                rusqlite::params![project.as_str(), user.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let repo = ParticipantRepo::new(db);
        let conv = ConversationId::new();
        let user = UserId::from_raw("user_1");

        repo.add(&conv, &user).unwrap();
        repo.add(&conv, &user).unwrap();
        assert!(repo.is_participant(&conv, &user).unwrap());
        assert_eq!(repo.participants(&conv).unwrap().len(), 1);
    }

    #[test]
    fn remove_revokes_membership() {
        let db = Database::in_memory().unwrap();
        let repo = ParticipantRepo::new(db);
        let conv = ConversationId::new();
        let user = UserId::from_raw("user_1");

        repo.add(&conv, &user).unwrap();
        repo.remove(&conv, &user).unwrap();
        assert!(!repo.is_participant(&conv, &user).unwrap());
    }

    #[test]
    fn project_membership_is_separate() {
        let db = Database::in_memory().unwrap();
        let repo = ParticipantRepo::new(db);
        let project = ProjectId::new();
        let user = UserId::from_raw("user_1");

        assert!(!repo.is_project_member(&project, &user).unwrap());
        repo.add_project_member(&project, &user).unwrap();
        assert!(repo.is_project_member(&project, &user).unwrap());
    }
}
