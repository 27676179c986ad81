use crate::config::Config;
use crate::conversation::{sanitize, Message};
use crate::params::GenerationParams;
use anyhow::{Context, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;

/// Stream of content fragments as they arrive from the endpoint
pub type TokenStream = BoxStream<'static, Result<String>>;

/// A chat-completion endpoint that streams content fragments.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        params: GenerationParams,
    ) -> Result<TokenStream>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

/// Client for the Hugging Face inference API (OpenAI-compatible route)
#[derive(Clone)]
pub struct HfClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HfClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let api_key = config.get_api_key();
        if api_key.is_none() {
            tracing::warn!("no API key configured, requests will be anonymous");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/models/{}/v1/chat/completions", self.base_url, self.model)
    }
}

#[async_trait]
impl CompletionBackend for HfClient {
    async fn stream_chat(
        &self,
        messages: Vec<Message>,
        params: GenerationParams,
    ) -> Result<TokenStream> {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: true,
        };

        let mut request = self.client.post(self.completions_url()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(model = %self.model, messages = payload.messages.len(), "sending chat completion request");
        let response = request.send().await.context("Request to inference API failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Inference API error ({}): {}", status, upstream_error_message(&body));
        }

        Ok(decode_stream(response).boxed())
    }
}

/// Turn a streaming `chat/completions` response into content fragments,
/// ending at `[DONE]` or when the body closes.
fn decode_stream(response: reqwest::Response) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut finished = false;

        while !finished {
            let Some(chunk) = bytes.next().await else {
                break;
            };
            let chunk = chunk.context("Failed to read response stream")?;
            for event in decoder.push(&chunk)? {
                match event {
                    SseEvent::Token(token) => yield token,
                    SseEvent::Done => {
                        finished = true;
                        break;
                    }
                }
            }
        }

        if !finished {
            for event in decoder.finish()? {
                if let SseEvent::Token(token) = event {
                    yield token;
                }
            }
        }
    }
}

/// Pull `error` out of a JSON error body, falling back to the raw text.
fn upstream_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(error_message))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Message carried by an `error` field: a string, an object with a
/// `message`, or any other non-null value rendered as JSON.
fn error_message(error: &serde_json::Value) -> Option<String> {
    match error {
        serde_json::Value::Null => None,
        serde_json::Value::String(message) => Some(message.clone()),
        other => Some(
            other
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

/// Longest line the decoder buffers before giving up on the stream
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Content fragment from `choices[0].delta.content`
    Token(String),
    /// `data: [DONE]`
    Done,
}

/// Incremental decoder for the `chat/completions` event stream.
///
/// Bytes are buffered until a full line is available, so chunk boundaries
/// inside a line or inside a multi-byte character are harmless.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // bytes of `buffer` already known to hold no newline
    scanned: usize,
}

impl SseDecoder {
    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=self.scanned + pos).collect();
            self.scanned = 0;
            if let Some(event) = parse_line(&sanitize(&line))? {
                events.push(event);
            }
        }
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            anyhow::bail!(
                "Stream line exceeds {} bytes without a newline",
                MAX_LINE_BYTES
            );
        }
        Ok(events)
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Result<Vec<SseEvent>> {
        self.scanned = 0;
        let line = std::mem::take(&mut self.buffer);
        Ok(parse_line(&sanitize(&line))?.into_iter().collect())
    }
}

fn parse_line(line: &str) -> Result<Option<SseEvent>> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        // blank separators, comments, `event:` and `id:` fields
        return Ok(None);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: serde_json::Value = serde_json::from_str(data)
        .with_context(|| format!("Malformed stream chunk: {}", data))?;

    if let Some(message) = chunk.get("error").and_then(error_message) {
        anyhow::bail!(message);
    }

    let content = chunk
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str());

    Ok(content.map(|c| SseEvent::Token(c.to_string())))
}
