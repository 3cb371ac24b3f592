use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{ConversationId, ProjectId, UserId};

/// Domain events that must reach the broker. Each maps deterministically to
/// an outbox entry; the aggregate id is derived from a stable name so
/// re-processing the same aggregate is idempotent at the identity level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    ConversationCleanup {
        conversation_id: ConversationId,
        user_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ProjectCleanup {
        project_id: ProjectId,
        user_id: UserId,
        occurred_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ProjectUploaded {
        project_id: ProjectId,
        name: String,
        temp_dir: String,
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Name-derived UUID, never random. The same aggregate always hashes to
    /// the same id across retries and restarts.
    pub fn aggregate_id(&self) -> Uuid {
        let name = match self {
            Self::ConversationCleanup {
                conversation_id, ..
            } => format!("conversation:{conversation_id}"),
            Self::ProjectCleanup { project_id, .. } | Self::ProjectUploaded { project_id, .. } => {
                format!("project:{project_id}")
            }
        };
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }

    pub fn aggregate_type(&self) -> AggregateType {
        match self {
            Self::ConversationCleanup { .. } => AggregateType::Conversation,
            Self::ProjectCleanup { .. } | Self::ProjectUploaded { .. } => AggregateType::Project,
        }
    }

    pub fn event_type(&self) -> OutboxEventType {
        match self {
            Self::ConversationCleanup { .. } => OutboxEventType::ConversationCleanup,
            Self::ProjectCleanup { .. } => OutboxEventType::ProjectCleanup,
            Self::ProjectUploaded { .. } => OutboxEventType::ProjectUploaded,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::ConversationCleanup { occurred_at, .. }
            | Self::ProjectCleanup { occurred_at, .. }
            | Self::ProjectUploaded { occurred_at, .. } => *occurred_at,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Conversation,
    Project,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Project => "project",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventType {
    ConversationCleanup,
    ProjectCleanup,
    ProjectUploaded,
}

impl OutboxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConversationCleanup => "conversation_cleanup",
            Self::ProjectCleanup => "project_cleanup",
            Self::ProjectUploaded => "project_uploaded",
        }
    }

    /// Static event-type → broker-topic mapping.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ConversationCleanup => "conversation-cleanup",
            Self::ProjectCleanup => "project-cleanup",
            Self::ProjectUploaded => "project-uploaded",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
        }
    }
}

/// One row of the transactional outbox. The payload is immutable once
/// written; only the relay moves status Pending → Published.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: AggregateType,
    pub event_type: OutboxEventType,
    pub status: OutboxStatus,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn from_event(event: &DomainEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::now_v7(),
            aggregate_id: event.aggregate_id(),
            aggregate_type: event.aggregate_type(),
            event_type: event.event_type(),
            status: OutboxStatus::Pending,
            payload: serde_json::to_string(event)?,
            created_at: Utc::now(),
            published_at: None,
        })
    }
}
