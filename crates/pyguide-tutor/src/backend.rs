//! Streaming chat-completion client for OpenAI-compatible backends.
//!
//! The [`ChatBackend`] trait is the seam between the stream relay and the
//! model server. [`OpenAiCompatBackend`] talks to any server exposing
//! `POST {base_url}/chat/completions` with `stream: true` (Ollama, vLLM,
//! llama.cpp, `OpenAI` itself) and decodes its `text/event-stream` body.

use std::fmt;

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::{Result, TutorError};
use crate::prompt::ComposedPrompt;

/// Terminal sentinel sent by OpenAI-compatible servers.
const DONE_SENTINEL: &str = "[DONE]";

/// A boxed, owned stream of chunks from one chat completion.
pub type ChunkStream = BoxStream<'static, Result<ChatChunk>>;

/// A source of streamed chat completions.
///
/// Implementations must surface connection failures as an error item on the
/// returned stream rather than failing up front, so consumers have a single
/// failure path. Dropping the stream must release the underlying connection.
pub trait ChatBackend: Send + Sync + fmt::Debug {
    /// Starts a streaming completion for `request`.
    fn stream_chat(&self, request: ChatRequest) -> ChunkStream;
}

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model.
    System,
    /// The student's message.
    User,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who is speaking.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

/// Request body for a streaming chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation, system message first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Always `true`: the relay only speaks the streaming protocol.
    pub stream: bool,
}

impl ChatRequest {
    /// Builds a streaming request from a composed prompt pair.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: ComposedPrompt, temperature: f32) -> Self {
        Self {
            model: model.into(),
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: prompt.system_prompt,
                },
                ChatMessage {
                    role: ChatRole::User,
                    content: prompt.user_prompt,
                },
            ],
            temperature,
            stream: true,
        }
    }
}

/// One incremental unit of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatChunk {
    /// Text delta, if this chunk carries any.
    pub content: Option<String>,
}

impl ChatChunk {
    /// A chunk carrying `text`.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
        }
    }

    /// A chunk with no text (role announcements, finish markers).
    #[must_use]
    pub const fn empty() -> Self {
        Self { content: None }
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChunkError {
    Detailed { message: String },
    Plain(String),
}

impl ChunkError {
    fn into_message(self) -> String {
        match self {
            Self::Detailed { message } | Self::Plain(message) => message,
        }
    }
}

/// Decodes one `data:` payload into a chunk.
///
/// Only the first choice is read; a payload without choices (usage reports)
/// yields an empty chunk.
fn parse_chunk(data: &str) -> Result<ChatChunk> {
    let payload: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| TutorError::malformed_stream(format!("invalid chunk payload: {e}")))?;

    if let Some(error) = payload.error {
        return Err(TutorError::backend_reported(error.into_message()));
    }

    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content);
    Ok(ChatChunk { content })
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    /// The joined `data:` lines of an event.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Incremental `text/event-stream` decoder.
///
/// Buffers raw bytes so multi-byte characters split across network reads
/// are decoded intact.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no event separator.
    scanned: usize,
}

impl SseDecoder {
    /// Feeds bytes and returns every event completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(bytes.iter().filter(|&&b| b != b'\r'));

        let mut events = Vec::new();
        loop {
            // Back up one byte: a separator may straddle two reads.
            let from = self.scanned.saturating_sub(1);
            let Some(offset) = self.buffer[from..].windows(2).position(|w| w == b"\n\n") else {
                self.scanned = self.buffer.len();
                break;
            };
            let end = from + offset;
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.scanned = 0;
            if let Some(event) = decode_event(&raw[..end]) {
                events.push(event);
            }
        }
        events
    }

    /// Flushes a trailing event that was not followed by a blank line.
    fn finish(self) -> Option<SseEvent> {
        decode_event(&self.buffer)
    }
}

/// Decodes a single event block. Comments and non-data fields are ignored.
fn decode_event(raw: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(raw);
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return None;
    }
    let data = data.join("\n");
    if data.trim() == DONE_SENTINEL {
        Some(SseEvent::Done)
    } else if data.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(data))
    }
}

// ============================================================================
// HTTP backend
// ============================================================================

/// Chat backend speaking the OpenAI chat-completions streaming protocol.
///
/// Holds one `reqwest::Client`; cloning the backend shares its connection
/// pool.
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatBackend {
    /// Creates a backend for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            TutorError::config_validation(
                format!("cannot initialise HTTP client: {e}"),
                "Check the TLS configuration of this machine",
            )
        })?;
        Ok(Self::with_client(client, config))
    }

    /// Creates a backend that reuses an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            client,
            url: config.completions_url(),
            api_key: config.api_key.clone(),
        }
    }
}

/// Sends the completion request and checks the response status.
async fn open_stream(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    request: &ChatRequest,
) -> Result<reqwest::Response> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(request)
        .send()
        .await
        .map_err(|e| TutorError::backend_unreachable(url, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TutorError::backend_status(status.as_u16(), &body));
    }
    Ok(response)
}

impl ChatBackend for OpenAiCompatBackend {
    fn stream_chat(&self, request: ChatRequest) -> ChunkStream {
        let client = self.client.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();

        let stream = try_stream! {
            debug!(url = %url, model = %request.model, "Opening completion stream");
            let response = open_stream(&client, &url, &api_key, &request).await?;
            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut done = false;

            while let Some(bytes) = body.next().await {
                let bytes = bytes.map_err(|e| {
                    TutorError::malformed_stream(format!("connection lost mid-stream: {e}"))
                })?;

                for event in decoder.push(&bytes) {
                    match event {
                        SseEvent::Done => {
                            done = true;
                            break;
                        }
                        SseEvent::Data(data) => {
                            let chunk = parse_chunk(&data)?;
                            yield chunk;
                        }
                    }
                }

                if done {
                    break;
                }
            }

            if !done {
                if let Some(SseEvent::Data(data)) = decoder.finish() {
                    let chunk = parse_chunk(&data)?;
                    yield chunk;
                }
            }
            debug!(url = %url, "Completion stream finished");
        };

        Box::pin(stream)
    }
}

// ============================================================================
// Test support
// ============================================================================
