pub mod channel;
pub mod context;
pub mod errors;
pub mod ids;
pub mod message;
pub mod outbox;

pub use channel::ChannelKind;
pub use context::DispatchContext;
pub use errors::AiError;
pub use message::MessageEvent;
pub use outbox::{DomainEvent, OutboxEntry, OutboxStatus};
