use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use courier_core::errors::AiError;
use courier_core::ids::{ConversationId, ProjectId};

use crate::client::{AiClient, TokenStream};

/// Pre-programmed responses for deterministic testing without a live service.
pub enum MockAiResponse {
    /// Yield the given tokens in order, then end.
    Tokens(Vec<String>),
    /// Yield some tokens, then an error mid-stream.
    TokensThenError(Vec<String>, AiError),
    /// Fail the stream_tokens() call itself.
    Error(AiError),
    /// Wait a duration, then resolve to the inner response.
    Delay(Duration, Box<MockAiResponse>),
}

impl MockAiResponse {
    /// Convenience: a token stream from string slices.
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Tokens(tokens.into_iter().map(Into::into).collect())
    }

    pub fn delayed(delay: Duration, inner: MockAiResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock AI client that consumes scripted responses in order and records
/// stop requests.
pub struct MockAiClient {
    responses: Mutex<VecDeque<MockAiResponse>>,
    call_count: AtomicUsize,
    stops: Mutex<Vec<ConversationId>>,
    fail_stop: AtomicBool,
}

impl MockAiClient {
    pub fn new(responses: Vec<MockAiResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
            stops: Mutex::new(Vec::new()),
            fail_stop: AtomicBool::new(false),
        }
    }

    /// Make every stop() call fail, for exercising best-effort cleanup.
    pub fn with_failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::Relaxed);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn stop_calls(&self) -> Vec<ConversationId> {
        self.stops.lock().clone()
    }
}

#[async_trait]
impl AiClient for MockAiClient {
    async fn stream_tokens(
        &self,
        _conversation_id: &ConversationId,
        _project_id: Option<&ProjectId>,
    ) -> Result<TokenStream, AiError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut response = self.responses.lock().pop_front().ok_or_else(|| {
            AiError::InvalidRequest(format!("MockAiClient: no response configured for call {idx}"))
        })?;

        // Unroll nested delays iteratively.
        loop {
            match response {
                MockAiResponse::Tokens(tokens) => {
                    let items: Vec<Result<String, AiError>> =
                        tokens.into_iter().map(Ok).collect();
                    return Ok(Box::pin(stream::iter(items)));
                }
                MockAiResponse::TokensThenError(tokens, error) => {
                    let mut items: Vec<Result<String, AiError>> =
                        tokens.into_iter().map(Ok).collect();
                    items.push(Err(error));
                    return Ok(Box::pin(stream::iter(items)));
                }
                MockAiResponse::Error(e) => return Err(e),
                MockAiResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    response = *inner;
                }
            }
        }
    }

    async fn stop(&self, conversation_id: &ConversationId) -> Result<(), AiError> {
        self.stops.lock().push(conversation_id.clone());
        if self.fail_stop.load(Ordering::Relaxed) {
            return Err(AiError::NetworkError("mock stop failure".into()));
        }
        Ok(())
    }
}
