use crate::conversation::Message;
use crate::llm::CompletionBackend;
use crate::params::GenerationParams;
use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;

/// One step of a streamed answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseUpdate {
    /// Everything received so far
    Partial(String),
    /// The upstream call failed; carries the underlying message
    Failed(String),
}

impl ResponseUpdate {
    pub fn is_failure(&self) -> bool {
        matches!(self, ResponseUpdate::Failed(_))
    }
}

impl fmt::Display for ResponseUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseUpdate::Partial(text) => f.write_str(text),
            ResponseUpdate::Failed(message) => write!(f, "An error occurred: {}", message),
        }
    }
}

/// Submit `payload` and yield the cumulative response after every token.
///
/// A failure ends the stream with a single `Failed` update; nothing after it.
pub fn respond_updates(
    backend: Arc<dyn CompletionBackend>,
    payload: Vec<Message>,
    params: GenerationParams,
) -> BoxStream<'static, ResponseUpdate> {
    Box::pin(stream! {
        let mut tokens = match backend.stream_chat(payload, params).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "chat completion request failed");
                yield ResponseUpdate::Failed(e.to_string());
                return;
            }
        };

        let mut response = String::new();
        while let Some(token) = tokens.next().await {
            match token {
                Ok(token) => {
                    response.push_str(&token);
                    yield ResponseUpdate::Partial(response.clone());
                }
                Err(e) => {
                    tracing::warn!(error = %e, received = response.len(), "chat completion stream failed");
                    yield ResponseUpdate::Failed(e.to_string());
                    break;
                }
            }
        }
        tracing::debug!(chars = response.chars().count(), "chat completion finished");
    })
}

/// String view of [`respond_updates`]: failures become
/// `"An error occurred: <message>"` in the same channel as model output.
pub fn respond(
    backend: Arc<dyn CompletionBackend>,
    payload: Vec<Message>,
    params: GenerationParams,
) -> BoxStream<'static, String> {
    respond_updates(backend, payload, params)
        .map(|update| update.to_string())
        .boxed()
}
