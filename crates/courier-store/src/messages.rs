use chrono::{DateTime, Utc};
use tracing::instrument;

use courier_core::ids::{ConversationId, MessageId, UserId};
use courier_core::message::{MessageEvent, MessageType, Recipient};

use crate::database::Database;
use crate::error::StoreError;

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, event), fields(message_id = %event.message_id, conversation_id = %event.conversation_id))]
    pub fn save(&self, event: &MessageEvent) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, text, type, reply_to_message_id, recipient, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    event.message_id.as_str(),
                    event.conversation_id.as_str(),
                    event.sender_id.as_str(),
                    event.text,
                    kind_str(event.kind),
                    event.reply_to_message_id.as_ref().map(|m| m.as_str()),
                    recipient_str(event.recipient),
                    event.occurred_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Most recent messages first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list_recent(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
    ) -> Result<Vec<MessageEvent>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, text, type, reply_to_message_id, recipient, occurred_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY occurred_at DESC LIMIT ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![conversation_id.as_str(), limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let reply: Option<String> = row.get(5)?;
                let occurred: String = row.get(7)?;
                out.push(MessageEvent {
                    message_id: MessageId::from_raw(row.get::<_, String>(0)?),
                    conversation_id: ConversationId::from_raw(row.get::<_, String>(1)?),
                    sender_id: UserId::from_raw(row.get::<_, String>(2)?),
                    text: row.get(3)?,
                    kind: parse_kind(&row.get::<_, String>(4)?)?,
                    reply_to_message_id: reply.map(MessageId::from_raw),
                    recipient: parse_recipient(&row.get::<_, String>(6)?)?,
                    occurred_at: parse_timestamp(&occurred)?,
                });
            }
            Ok(out)
        })
    }
}

fn kind_str(kind: MessageType) -> &'static str {
    match kind {
        MessageType::Text => "text",
        MessageType::System => "system",
    }
}

fn parse_kind(s: &str) -> Result<MessageType, StoreError> {
    match s {
        "text" => Ok(MessageType::Text),
        "system" => Ok(MessageType::System),
        other => Err(StoreError::Database(format!("unknown message type: {other}"))),
    }
}

fn recipient_str(recipient: Recipient) -> &'static str {
    match recipient {
        Recipient::Users => "users",
        Recipient::Ai => "ai",
    }
}

fn parse_recipient(s: &str) -> Result<Recipient, StoreError> {
    match s {
        "users" => Ok(Recipient::Users),
        "ai" => Ok(Recipient::Ai),
        other => Err(StoreError::Database(format!("unknown recipient: {other}"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationRepo;

    fn setup() -> (Database, ConversationId) {
        let db = Database::in_memory().unwrap();
        let conv = ConversationRepo::new(db.clone())
            .create(None, "test")
            .unwrap();
        (db, conv.id)
    }

    #[test]
    fn save_and_list_roundtrip() {
        let (db, conv_id) = setup();
        let repo = MessageRepo::new(db);

        let event = MessageEvent {
            message_id: MessageId::new(),
            conversation_id: conv_id.clone(),
            sender_id: UserId::from_raw("user_3"),
            text: "hello there".into(),
            kind: MessageType::Text,
            reply_to_message_id: None,
            recipient: Recipient::Ai,
            occurred_at: Utc::now(),
        };
        repo.save(&event).unwrap();

        let listed = repo.list_recent(&conv_id, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].text, "hello there");
        assert_eq!(listed[0].recipient, Recipient::Ai);
        assert_eq!(listed[0].message_id, event.message_id);
    }

    #[test]
    fn list_respects_limit_and_order() {
        let (db, conv_id) = setup();
        let repo = MessageRepo::new(db);

        for i in 0..5 {
            let mut event = MessageEvent::ai_text(conv_id.clone(), format!("m{i}"));
            event.occurred_at = Utc::now() + chrono::Duration::seconds(i);
            repo.save(&event).unwrap();
        }

        let listed = repo.list_recent(&conv_id, 2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].text, "m4");
        assert_eq!(listed[1].text, "m3");
    }

    #[test]
    fn save_requires_existing_conversation() {
        let db = Database::in_memory().unwrap();
        let repo = MessageRepo::new(db);
        let event = MessageEvent::ai_text(ConversationId::new(), "orphan");
        assert!(repo.save(&event).is_err());
    }
}
