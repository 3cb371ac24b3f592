pub mod client;
pub mod http;
pub mod mock;
pub mod reliable;

pub use client::{AiClient, TokenStream};
pub use http::HttpAiClient;
pub use mock::MockAiClient;
pub use reliable::{ReliableAiClient, ReliableConfig};
