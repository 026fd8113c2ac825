//! HTTP API for the PyGuide tutor.
//!
//! # Endpoints
//!
//! - `GET /` - The tutoring page
//! - `POST /debug` - Stream Socratic hints for a problem/code/skill form
//!
//! `POST /debug` always answers `200 OK` with `text/event-stream`. The body
//! is the raw concatenation of model fragments; backend failures arrive
//! in-band as a final fragment starting with `**An error occurred:**`.
//!
//! # Example
//!
//! ```no_run
//! use pyguide_tutor::{create_router, AppState, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let state = AppState::new(Config::default())?;
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::backend::{ChatBackend, OpenAiCompatBackend};
use crate::prompt;
use crate::relay::{RelaySettings, StreamRelay};
use crate::{Config, Result};

/// Page served at `GET /` when no `indexPage` is configured.
pub const BUNDLED_INDEX_PAGE: &str = include_str!("../assets/index.html");

/// Skill level assumed when the form omits it.
pub const DEFAULT_SKILL: &str = "Beginner";

// ============================================================================
// Request/Response Types
// ============================================================================

fn default_skill() -> String {
    DEFAULT_SKILL.to_string()
}

/// Form body for `POST /debug`.
///
/// Accepts `application/x-www-form-urlencoded` and `multipart/form-data`.
/// Each field is read on its own: a missing field takes its default, the
/// first value of a repeated field wins, and unknown fields are ignored.
/// Extraction never rejects the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugForm {
    /// What the student is trying to solve.
    pub problem: String,
    /// The student's code.
    pub code: String,
    /// Self-reported skill level, passed through unvalidated.
    pub skill: String,
}

impl Default for DebugForm {
    fn default() -> Self {
        Self {
            problem: String::new(),
            code: String::new(),
            skill: default_skill(),
        }
    }
}

impl DebugForm {
    /// Builds the form from raw key/value pairs.
    #[must_use]
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut problem = None;
        let mut code = None;
        let mut skill = None;

        for (key, value) in pairs {
            let slot = match key.as_str() {
                "problem" => &mut problem,
                "code" => &mut code,
                "skill" => &mut skill,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        Self {
            problem: problem.unwrap_or_default(),
            code: code.unwrap_or_default(),
            skill: skill.unwrap_or_else(default_skill),
        }
    }
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

/// Collects the text fields of a multipart body, keeping what was read
/// before any decoding error.
async fn multipart_pairs(mut multipart: Multipart) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Stopped reading multipart form");
                break;
            }
        };
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.text().await {
            Ok(value) => pairs.push((name, value)),
            Err(e) => {
                debug!(field = %name, error = %e, "Stopped reading multipart form");
                break;
            }
        }
    }
    pairs
}

#[async_trait]
impl<S> FromRequest<S> for DebugForm
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let pairs = if is_multipart(&req) {
            match Multipart::from_request(req, state).await {
                Ok(multipart) => multipart_pairs(multipart).await,
                Err(rejection) => {
                    debug!(error = %rejection, "Unreadable multipart form; using defaults");
                    Vec::new()
                }
            }
        } else {
            match Form::<Vec<(String, String)>>::from_request(req, state).await {
                Ok(Form(pairs)) => pairs,
                Err(rejection) => {
                    debug!(error = %rejection, "Unreadable form; using defaults");
                    Vec::new()
                }
            }
        };
        Ok(Self::from_pairs(pairs))
    }
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
///
/// Immutable after construction; handlers only read it.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration for the server.
    pub config: Config,
    /// Relay to the model backend.
    pub relay: StreamRelay,
}

impl AppState {
    /// Creates state backed by the configured OpenAI-compatible endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: Config) -> Result<Self> {
        let backend = OpenAiCompatBackend::new(&config.backend)?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Creates state over an arbitrary chat backend.
    #[must_use]
    pub fn with_backend(config: Config, backend: Arc<dyn ChatBackend>) -> Self {
        let relay = StreamRelay::new(backend, RelaySettings::from(&config.backend));
        Self { config, relay }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// The configured index page could not be read.
    PageUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::PageUnavailable(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router carries request tracing and a permissive CORS layer.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/debug", post(handle_debug))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /`.
async fn handle_index(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<Html<String>, ApiError> {
    let Some(path) = state.config.index_page.as_deref() else {
        return Ok(Html(BUNDLED_INDEX_PAGE.to_string()));
    };

    tokio::fs::read_to_string(path).await.map(Html).map_err(|e| {
        warn!(path = %path, error = %e, "Cannot read index page");
        ApiError::PageUnavailable(format!("Index page '{path}' is unavailable: {e}"))
    })
}

/// Handler for `POST /debug`.
async fn handle_debug(State(state): State<Arc<AppState>>, form: DebugForm) -> Response {

    info!(
        skill = %form.skill,
        problem_len = form.problem.len(),
        code_len = form.code.len(),
        "Received debug request"
    );

    let prompt = prompt::compose(&form.problem, &form.code, &form.skill);
    let fragments = state.relay.relay(prompt).map(Ok::<_, Infallible>);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(fragments),
    )
        .into_response()
}

// ============================================================================
// Tests
// ============================================================================
