pub mod broker;
pub mod relay;

pub use broker::{BrokerError, BrokerPublisher, LoggingBroker, MockBroker};
pub use relay::{OutboxRelay, RelayConfig, TickSummary};
