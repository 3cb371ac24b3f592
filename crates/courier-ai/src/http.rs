use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use courier_core::errors::AiError;
use courier_core::ids::{ConversationId, ProjectId};

use crate::client::{AiClient, TokenStream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for the AI generation service. `POST {base}/generate` streams
/// the response body as raw UTF-8 token chunks; `POST {base}/stop/{id}` halts
/// server-side generation.
pub struct HttpAiClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
}

impl HttpAiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn stream_tokens(
        &self,
        conversation_id: &ConversationId,
        project_id: Option<&ProjectId>,
    ) -> Result<TokenStream, AiError> {
        let body = GenerateRequest {
            conversation_id: conversation_id.as_str(),
            project_id: project_id.map(|p| p.as_str()),
        };

        let resp = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::from_status(status, body));
        }

        let stream = TokenRelayStream::new(resp.bytes_stream(), IDLE_TIMEOUT);
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    async fn stop(&self, conversation_id: &ConversationId) -> Result<(), AiError> {
        let resp = self
            .client
            .post(format!("{}/stop/{}", self.base_url, conversation_id))
            .send()
            .await
            .map_err(|e| AiError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AiError::from_status(status, body));
        }
        Ok(())
    }
}

/// Wraps the response byte stream and yields each chunk as one token.
/// If no data arrives within `idle_duration`, the stream ends with an error.
struct TokenRelayStream<S> {
    inner: Pin<Box<S>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl<S> TokenRelayStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    fn new(byte_stream: S, idle_duration: Duration) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            idle_deadline: Box::pin(tokio::time::sleep(idle_duration)),
            idle_duration,
            done: false,
        }
    }
}

impl<S> Stream for TokenRelayStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    type Item = Result<String, AiError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if self.done {
            return std::task::Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                std::task::Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    if bytes.is_empty() {
                        continue;
                    }
                    let token = String::from_utf8_lossy(&bytes).into_owned();
                    return std::task::Poll::Ready(Some(Ok(token)));
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return std::task::Poll::Ready(Some(Err(AiError::StreamInterrupted(
                        e.to_string(),
                    ))));
                }
                std::task::Poll::Ready(None) => {
                    return std::task::Poll::Ready(None);
                }
                std::task::Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        return std::task::Poll::Ready(Some(Err(AiError::StreamInterrupted(
                            format!("idle timeout after {}s", self.idle_duration.as_secs()),
                        ))));
                    }
                    return std::task::Poll::Pending;
                }
            }
        }
    }
}
