use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use courier_core::errors::AiError;
use courier_core::ids::{ConversationId, ProjectId};

/// Tokens arrive in emission order; the consumer forwards them one at a time.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AiError>> + Send>>;

/// The external AI generation collaborator.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Open a token stream for one conversation turn. The service assembles
    /// chat history and project context on its side.
    async fn stream_tokens(
        &self,
        conversation_id: &ConversationId,
        project_id: Option<&ProjectId>,
    ) -> Result<TokenStream, AiError>;

    /// Ask the service to halt generation for a conversation. Best-effort;
    /// callers treat failures as advisory.
    async fn stop(&self, conversation_id: &ConversationId) -> Result<(), AiError>;
}
