use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

#[derive(Clone, Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Message broker collaborator. One publish per outbox entry; the relay
/// retries failed entries on later ticks, so implementations should not
/// retry internally.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError>;
}

/// Stand-in publisher for deployments without a broker integration: records
/// the event in the log stream and succeeds.
pub struct LoggingBroker;

#[async_trait]
impl BrokerPublisher for LoggingBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        info!(topic = topic, payload_len = payload.len(), "publishing domain event");
        Ok(())
    }
}

/// Mock broker with scripted outcomes, consumed in call order. Calls beyond
/// the script succeed. Successful publishes are recorded.
pub struct MockBroker {
    outcomes: Mutex<VecDeque<Result<(), BrokerError>>>,
    published: Mutex<Vec<(String, String)>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcomes(outcomes: Vec<Result<(), BrokerError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// (topic, payload) pairs that published successfully, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl BrokerPublisher for MockBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.published
                .lock()
                .push((topic.to_owned(), payload.to_owned()));
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_defaults_to_success() {
        let broker = MockBroker::new();
        broker.publish("topic-a", "{}").await.unwrap();
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn mock_consumes_scripted_outcomes_in_order() {
        let broker = MockBroker::with_outcomes(vec![
            Ok(()),
            Err(BrokerError::Unavailable("down".into())),
        ]);

        broker.publish("t", "1").await.unwrap();
        assert!(broker.publish("t", "2").await.is_err());
        broker.publish("t", "3").await.unwrap();

        let published: Vec<String> = broker.published().into_iter().map(|(_, p)| p).collect();
        assert_eq!(published, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn logging_broker_always_succeeds() {
        let broker = LoggingBroker;
        broker.publish("conversation-cleanup", "{}").await.unwrap();
    }
}
