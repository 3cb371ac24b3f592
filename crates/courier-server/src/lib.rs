pub mod adapters;
pub mod effects;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod socket;

pub use adapters::StoreBridge;
pub use notify::Notifier;
pub use orchestrator::AiStreamingOrchestrator;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};

#[cfg(test)]
pub(crate) mod test_support;
