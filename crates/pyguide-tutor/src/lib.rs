//! PyGuide tutor
//!
//! Composes Socratic tutoring prompts, relays them to an OpenAI-compatible
//! model backend, and streams the hints back over HTTP.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod prompt;
pub mod relay;

pub use api::{create_router, AppState, DebugForm, ErrorResponse, DEFAULT_SKILL};
pub use backend::{
    ChatBackend, ChatChunk, ChatMessage, ChatRequest, ChatRole, ChunkStream, OpenAiCompatBackend,
};
pub use config::{BackendConfig, Config, ServerConfig};
pub use error::{Result, TutorError};
pub use prompt::{compose, ComposedPrompt, SkillLevel};
pub use relay::{
    error_fragment, next_step, FragmentStream, RelaySettings, RelayState, RelayStep, StreamRelay,
    ERROR_PREFIX,
};
