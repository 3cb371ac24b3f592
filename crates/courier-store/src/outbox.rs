use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use tracing::instrument;
use uuid::Uuid;

use courier_core::outbox::{
    AggregateType, DomainEvent, OutboxEntry, OutboxEventType, OutboxStatus,
};

use crate::database::Database;
use crate::error::StoreError;

/// Transactional outbox access. Appends ride the caller's transaction;
/// the relay is the only writer of the Pending → Published transition.
pub struct OutboxRepo {
    db: Database,
}

impl OutboxRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Convert a domain event into an outbox row inside the caller's
    /// transaction. Taking the `Transaction` by reference is what makes the
    /// at-least-once guarantee hold: the entry commits or rolls back with
    /// the business mutation that produced it.
    pub fn append(tx: &Transaction, event: &DomainEvent) -> Result<OutboxEntry, StoreError> {
        let entry = OutboxEntry::from_event(event)?;
        tx.execute(
            "INSERT INTO outbox_events (id, aggregate_id, aggregate_type, event_type, status, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.id.to_string(),
                entry.aggregate_id.to_string(),
                entry.aggregate_type.as_str(),
                entry.event_type.as_str(),
                entry.status.as_str(),
                entry.payload,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(entry)
    }

    /// Oldest pending entries first, bounded by the relay's batch size.
    #[instrument(skip(self))]
    pub fn fetch_pending(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, aggregate_id, aggregate_type, event_type, status, payload, created_at, published_at
                 FROM outbox_events WHERE status = 'pending'
                 ORDER BY created_at ASC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_entry(row)?);
            }
            Ok(out)
        })
    }

    /// Mark the given entries Published in one batch update. The transition
    /// is monotonic: already-published rows are left untouched.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn mark_published(&self, ids: &[Uuid]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.with_conn(|conn| {
            let placeholders = (1..=ids.len())
                .map(|i| format!("?{}", i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "UPDATE outbox_events SET status = 'published', published_at = ?1
                 WHERE status = 'pending' AND id IN ({placeholders})"
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(Utc::now().to_rfc3339())];
            for id in ids {
                params.push(Box::new(id.to_string()));
            }
            let updated = conn.execute(
                &sql,
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            )?;
            Ok(updated)
        })
    }

    pub fn get(&self, id: &Uuid) -> Result<Option<OutboxEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, aggregate_id, aggregate_type, event_type, status, payload, created_at, published_at
                 FROM outbox_events WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_entry(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<OutboxEntry, StoreError> {
    let published: Option<String> = row.get(7)?;
    Ok(OutboxEntry {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        aggregate_id: parse_uuid(&row.get::<_, String>(1)?)?,
        aggregate_type: parse_aggregate_type(&row.get::<_, String>(2)?)?,
        event_type: parse_event_type(&row.get::<_, String>(3)?)?,
        status: parse_status(&row.get::<_, String>(4)?)?,
        payload: row.get(5)?,
        created_at: parse_timestamp(&row.get::<_, String>(6)?)?,
        published_at: published.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Database(format!("bad uuid {s}: {e}")))
}

fn parse_aggregate_type(s: &str) -> Result<AggregateType, StoreError> {
    match s {
        "conversation" => Ok(AggregateType::Conversation),
        "project" => Ok(AggregateType::Project),
        other => Err(StoreError::Database(format!(
            "unknown aggregate type: {other}"
        ))),
    }
}

fn parse_event_type(s: &str) -> Result<OutboxEventType, StoreError> {
    match s {
        "conversation_cleanup" => Ok(OutboxEventType::ConversationCleanup),
        "project_cleanup" => Ok(OutboxEventType::ProjectCleanup),
        "project_uploaded" => Ok(OutboxEventType::ProjectUploaded),
        other => Err(StoreError::Database(format!("unknown event type: {other}"))),
    }
}

fn parse_status(s: &str) -> Result<OutboxStatus, StoreError> {
    match s {
        "pending" => Ok(OutboxStatus::Pending),
        "published" => Ok(OutboxStatus::Published),
        other => Err(StoreError::Database(format!("unknown status: {other}"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("bad timestamp {s}: {e}")))
}
