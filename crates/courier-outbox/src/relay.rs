use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_store::outbox::OutboxRepo;
use courier_store::{Database, StoreError};
use courier_telemetry::MetricsRecorder;

use crate::broker::BrokerPublisher;

/// Relay pacing: fixed batch per tick bounds memory if pending entries
/// accumulate during a broker outage.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub batch_size: usize,
    pub tick_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            tick_interval: Duration::from_secs(2),
        }
    }
}

/// What one tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
}

/// Periodic job draining the transactional outbox to the broker. The sole
/// writer of the Pending → Published transition.
pub struct OutboxRelay {
    db: Database,
    publisher: Arc<dyn BrokerPublisher>,
    metrics: Arc<MetricsRecorder>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        db: Database,
        publisher: Arc<dyn BrokerPublisher>,
        metrics: Arc<MetricsRecorder>,
        config: RelayConfig,
    ) -> Self {
        Self {
            db,
            publisher,
            metrics,
            config,
        }
    }

    /// One relay pass: fetch a bounded batch of pending entries in creation
    /// order, publish each, then mark the successes in a single update.
    /// A failed entry stays Pending and is retried next tick; it never
    /// blocks its batch siblings.
    pub async fn tick(&self) -> Result<TickSummary, StoreError> {
        let db = self.db.clone();
        let batch_size = self.config.batch_size;
        let pending = tokio::task::spawn_blocking(move || {
            OutboxRepo::new(db).fetch_pending(batch_size)
        })
        .await
        .map_err(|e| StoreError::Database(format!("fetch task: {e}")))??;

        if pending.is_empty() {
            return Ok(TickSummary::default());
        }

        let mut published_ids = Vec::new();
        let mut failed = 0usize;
        for entry in &pending {
            let topic = entry.event_type.topic();
            match self.publisher.publish(topic, &entry.payload).await {
                Ok(()) => {
                    debug!(entry_id = %entry.id, topic = topic, "outbox entry published");
                    published_ids.push(entry.id);
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        entry_id = %entry.id,
                        topic = topic,
                        error = %e,
                        "publish failed, entry stays pending"
                    );
                }
            }
        }

        if !published_ids.is_empty() {
            let db = self.db.clone();
            let ids = published_ids.clone();
            let marked = tokio::task::spawn_blocking(move || {
                OutboxRepo::new(db).mark_published(&ids)
            })
            .await;
            match marked {
                Ok(Ok(count)) => {
                    debug!(count = count, "outbox entries marked published");
                }
                Ok(Err(e)) => {
                    // Publish succeeded but the mark did not. The entries
                    // will be republished next tick; broker consumers dedupe
                    // by aggregate id + event type.
                    error!(error = %e, "failed to mark published entries, they will be re-sent");
                }
                Err(e) => {
                    error!(error = %e, "mark-published task failed, entries will be re-sent");
                }
            }
        }

        self.metrics.incr("outbox.published", published_ids.len() as u64);
        self.metrics.incr("outbox.failed", failed as u64);
        info!(
            fetched = pending.len(),
            published = published_ids.len(),
            failed = failed,
            "outbox relay tick"
        );

        Ok(TickSummary {
            fetched: pending.len(),
            published: published_ids.len(),
            failed,
        })
    }

    /// Run ticks on the fixed interval until cancelled.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("outbox relay stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.tick().await {
                            warn!(error = %e, "outbox relay tick failed");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, MockBroker};
    use chrono::Utc;
    use courier_core::ids::{ConversationId, UserId};
    use courier_core::outbox::{DomainEvent, OutboxStatus};

    fn cleanup_event(conversation: &str) -> DomainEvent {
        DomainEvent::ConversationCleanup {
            conversation_id: ConversationId::from_raw(conversation),
            user_id: UserId::from_raw("user_1"),
            occurred_at: Utc::now(),
        }
    }

    fn append(db: &Database, event: &DomainEvent) -> uuid::Uuid {
        db.transaction(|tx| OutboxRepo::append(tx, event))
            .unwrap()
            .id
    }

    fn relay(db: Database, broker: Arc<MockBroker>, config: RelayConfig) -> OutboxRelay {
        OutboxRelay::new(db, broker, Arc::new(MetricsRecorder::new()), config)
    }

    #[tokio::test]
    async fn tick_with_empty_outbox_does_nothing() {
        let db = Database::in_memory().unwrap();
        let broker = Arc::new(MockBroker::new());
        let relay = relay(db, broker.clone(), RelayConfig::default());

        let summary = relay.tick().await.unwrap();
        assert_eq!(summary, TickSummary::default());
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn one_tick_publishes_and_marks() {
        let db = Database::in_memory().unwrap();
        let id = append(&db, &cleanup_event("conv_1"));
        let broker = Arc::new(MockBroker::new());
        let relay = relay(db.clone(), broker.clone(), RelayConfig::default());

        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.published, 1);

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "conversation-cleanup");

        let stored = OutboxRepo::new(db).get(&id).unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Published);

        // A second tick finds nothing: published never regresses to pending.
        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.fetched, 0);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn failed_entry_stays_pending_without_blocking_siblings() {
        let db = Database::in_memory().unwrap();
        let id_1 = append(&db, &cleanup_event("conv_1"));
        let id_2 = append(&db, &cleanup_event("conv_2"));
        let id_3 = append(&db, &cleanup_event("conv_3"));

        // Entry #2's publish fails.
        let broker = Arc::new(MockBroker::with_outcomes(vec![
            Ok(()),
            Err(BrokerError::Unavailable("down".into())),
            Ok(()),
        ]));
        let relay = relay(db.clone(), broker.clone(), RelayConfig::default());

        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.published, 2);
        assert_eq!(summary.failed, 1);

        let repo = OutboxRepo::new(db);
        assert_eq!(repo.get(&id_1).unwrap().unwrap().status, OutboxStatus::Published);
        assert_eq!(repo.get(&id_2).unwrap().unwrap().status, OutboxStatus::Pending);
        assert_eq!(repo.get(&id_3).unwrap().unwrap().status, OutboxStatus::Published);

        // The failed entry reappears in the next tick's fetch and goes out.
        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.published, 1);
        assert_eq!(repo.get(&id_2).unwrap().unwrap().status, OutboxStatus::Published);
    }

    #[tokio::test]
    async fn batch_size_bounds_each_tick() {
        let db = Database::in_memory().unwrap();
        for i in 0..5 {
            append(&db, &cleanup_event(&format!("conv_{i}")));
        }
        let broker = Arc::new(MockBroker::new());
        let relay = relay(
            db,
            broker.clone(),
            RelayConfig {
                batch_size: 2,
                ..Default::default()
            },
        );

        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.fetched, 2);
        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.fetched, 2);
        let summary = relay.tick().await.unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(broker.published().len(), 5);
    }

    #[tokio::test]
    async fn start_ticks_until_cancelled() {
        let db = Database::in_memory().unwrap();
        append(&db, &cleanup_event("conv_1"));
        let broker = Arc::new(MockBroker::new());
        let relay = Arc::new(relay(
            db,
            broker.clone(),
            RelayConfig {
                batch_size: 10,
                tick_interval: Duration::from_millis(10),
            },
        ));

        let cancel = CancellationToken::new();
        let handle = relay.start(cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(broker.published().len(), 1);
    }
}
