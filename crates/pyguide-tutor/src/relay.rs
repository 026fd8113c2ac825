//! Stream relay between the model backend and the browser.
//!
//! The relay turns a composed prompt into a lazy stream of text fragments.
//! Each non-empty delta from the backend is forwarded as soon as it arrives,
//! in order. Any backend failure, whether before the first chunk or halfway
//! through, becomes exactly one markdown error fragment that ends the stream;
//! nothing is ever surfaced to the HTTP layer as an error.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──open──▶ Streaming ──end────▶ Done
//!                    │
//!                    └──failure──▶ ErrorEmitted
//! ```
//!
//! The fragment stream owns the backend response. Dropping it (the client
//! disconnected) drops the upstream connection and stops generation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::backend::{ChatBackend, ChatChunk, ChatRequest};
use crate::config::BackendConfig;
use crate::error::{Result, TutorError};
use crate::prompt::ComposedPrompt;

/// Markdown prefix of every error fragment.
pub const ERROR_PREFIX: &str = "\n\n**An error occurred:**";

/// A boxed stream of text fragments for one response body.
pub type FragmentStream = BoxStream<'static, String>;

/// Outcome of pulling from the backend once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStep {
    /// A non-empty text delta to forward.
    Fragment(String),
    /// The backend finished normally.
    End,
    /// The backend failed; the message is shown to the student.
    Failure(String),
}

/// Per-request relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Request not yet issued.
    Idle,
    /// Backend call issued; forwarding fragments.
    Streaming,
    /// Backend stream exhausted.
    Done,
    /// Error fragment sent.
    ErrorEmitted,
}

impl RelayState {
    /// Returns `true` for `Done` and `ErrorEmitted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::ErrorEmitted)
    }

    /// Applies one pull outcome to the state.
    ///
    /// `Idle` moves to `Streaming` on any step; terminal states never change.
    #[must_use]
    pub const fn advance(self, step: &RelayStep) -> Self {
        match (self, step) {
            (Self::Done | Self::ErrorEmitted, _) => self,
            (Self::Idle | Self::Streaming, RelayStep::Fragment(_)) => Self::Streaming,
            (Self::Idle | Self::Streaming, RelayStep::End) => Self::Done,
            (Self::Idle | Self::Streaming, RelayStep::Failure(_)) => Self::ErrorEmitted,
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Streaming => write!(f, "streaming"),
            Self::Done => write!(f, "done"),
            Self::ErrorEmitted => write!(f, "error_emitted"),
        }
    }
}

/// Formats the fragment sent to the student when the backend fails.
#[must_use]
pub fn error_fragment(message: &str, backend_name: &str) -> String {
    format!(
        "{ERROR_PREFIX} {message}. Please ensure the {backend_name} server is running and the model is available."
    )
}

/// Pulls chunks until one carries text, the stream ends, or it fails.
///
/// Empty and content-less chunks are skipped. With an `idle_timeout`, each
/// individual pull is bounded.
pub async fn next_step<S>(chunks: &mut S, idle_timeout: Option<Duration>) -> RelayStep
where
    S: Stream<Item = Result<ChatChunk>> + Unpin,
{
    loop {
        let pulled = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, chunks.next()).await {
                Ok(pulled) => pulled,
                Err(_) => {
                    let err = TutorError::backend_timeout(limit.as_secs());
                    return RelayStep::Failure(err.to_string());
                }
            },
            None => chunks.next().await,
        };

        match pulled {
            None => return RelayStep::End,
            Some(Err(err)) => return RelayStep::Failure(err.to_string()),
            Some(Ok(ChatChunk {
                content: Some(text),
            })) if !text.is_empty() => return RelayStep::Fragment(text),
            Some(Ok(_)) => {}
        }
    }
}

/// Fixed settings applied to every relayed request.
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Backend display name for error fragments.
    pub backend_name: String,
    /// Bound on the wait for each chunk.
    pub idle_timeout: Option<Duration>,
}

impl From<&BackendConfig> for RelaySettings {
    fn from(config: &BackendConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            backend_name: config.name.clone(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Tracks one relay run and logs how it ended, including abandonment.
struct RelayRun {
    state: RelayState,
    fragments: usize,
}

impl RelayRun {
    const fn new() -> Self {
        Self {
            state: RelayState::Idle,
            fragments: 0,
        }
    }

    fn start(&mut self) {
        self.state = RelayState::Streaming;
    }

    fn record(&mut self, step: &RelayStep) {
        self.state = self.state.advance(step);
        if matches!(step, RelayStep::Fragment(_)) {
            self.fragments += 1;
        }
    }
}

impl Drop for RelayRun {
    fn drop(&mut self) {
        if self.state.is_terminal() {
            info!(
                state = %self.state,
                fragments = self.fragments,
                "Relay finished"
            );
        } else {
            debug!(
                state = %self.state,
                fragments = self.fragments,
                "Relay dropped before completion; backend stream released"
            );
        }
    }
}

/// Relays composed prompts to a chat backend as a fragment stream.
///
/// Cheap to clone; the backend is shared across requests.
#[derive(Debug, Clone)]
pub struct StreamRelay {
    backend: Arc<dyn ChatBackend>,
    settings: RelaySettings,
}

impl StreamRelay {
    /// Creates a relay over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, settings: RelaySettings) -> Self {
        Self { backend, settings }
    }

    /// Starts a relay for `prompt`.
    ///
    /// The backend call is issued on first poll. The stream yields every
    /// non-empty text delta, then ends; on failure its last item is the
    /// [`error_fragment`].
    pub fn relay(&self, prompt: ComposedPrompt) -> FragmentStream {
        let request = ChatRequest::new(
            self.settings.model.clone(),
            prompt,
            self.settings.temperature,
        );
        let backend = Arc::clone(&self.backend);
        let idle_timeout = self.settings.idle_timeout;
        let backend_name = self.settings.backend_name.clone();

        let fragments = stream! {
            let mut run = RelayRun::new();
            let mut chunks = backend.stream_chat(request);
            run.start();

            loop {
                let step = next_step(&mut chunks, idle_timeout).await;
                run.record(&step);
                match step {
                    RelayStep::Fragment(text) => {
                        yield text;
                    }
                    RelayStep::End => break,
                    RelayStep::Failure(message) => {
                        warn!(error = %message, "Model backend failed; sending error fragment");
                        yield error_fragment(&message, &backend_name);
                        break;
                    }
                }
            }
        };

        Box::pin(fragments)
    }
}
