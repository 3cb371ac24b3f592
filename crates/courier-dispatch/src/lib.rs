pub mod dispatcher;
pub mod error;
pub mod participants;
pub mod readiness;
pub mod registry;
pub mod shared_store;
pub mod strategy;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::DispatchError;
pub use participants::{MembershipAuthority, ParticipantCoordinator};
pub use readiness::{ReadinessConfig, ReadinessCoordinator};
pub use registry::{SessionHandle, SessionRegistry, CLOSE_POLICY_VIOLATION};
pub use shared_store::{InMemorySharedStore, SharedStore};
pub use strategy::{InboundEffect, MessageStore, Payload};
