//! End-to-end tests for the `/debug` streaming endpoint.
//!
//! Each test starts a fake OpenAI-compatible backend and a real PyGuide
//! server on local ports, then drives them over HTTP.

use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use pyguide_tutor::{create_router, AppState, Config, ERROR_PREFIX};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::time::timeout;

// ============================================================================
// Fake backend
// ============================================================================

/// What the fake backend answers with.
#[derive(Clone)]
enum Script {
    /// Stream these deltas, then `[DONE]`.
    Deltas(Vec<&'static str>),
    /// Stream these deltas, then an undecodable payload.
    DeltasThenGarbage(Vec<&'static str>),
    /// Send the first delta, wait for the gate, then send the rest.
    Gated(&'static str, Vec<&'static str>, Arc<Notify>),
    /// Reply with a plain error status.
    Status(StatusCode, &'static str),
}

/// A request captured by the fake backend.
#[derive(Debug, Clone)]
struct Captured {
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct FakeBackend {
    script: Script,
    captured: Arc<Mutex<Vec<Captured>>>,
}

impl FakeBackend {
    fn new(script: Script) -> Self {
        Self {
            script,
            captured: Arc::default(),
        }
    }

    fn captured(&self) -> Vec<Captured> {
        self.captured.lock().expect("capture lock poisoned").clone()
    }
}

/// Encodes one streamed delta as a server-sent event.
fn sse_delta(text: &str) -> String {
    let payload = json!({
        "object": "chat.completion.chunk",
        "choices": [{ "index": 0, "delta": { "content": text }, "finish_reason": null }]
    });
    format!("data: {payload}\n\n")
}

/// The role announcement most servers send before any text.
fn sse_role() -> String {
    let payload = json!({ "choices": [{ "index": 0, "delta": { "role": "assistant" } }] });
    format!("data: {payload}\n\n")
}

const SSE_DONE: &str = "data: [DONE]\n\n";

fn event_stream(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn fake_completions(
    State(fake): State<FakeBackend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    fake.captured
        .lock()
        .expect("capture lock poisoned")
        .push(Captured {
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });

    match fake.script {
        Script::Deltas(deltas) => {
            let mut sse = sse_role();
            sse.extend(deltas.iter().map(|d| sse_delta(d)));
            sse.push_str(SSE_DONE);
            event_stream(Body::from(sse))
        }
        Script::DeltasThenGarbage(deltas) => {
            let mut sse: String = deltas.iter().map(|d| sse_delta(d)).collect();
            sse.push_str("data: {\"choices\": [oops\n\n");
            event_stream(Body::from(sse))
        }
        Script::Gated(first, rest, gate) => {
            let first = sse_delta(first);
            let mut tail: String = rest.iter().map(|d| sse_delta(d)).collect();
            tail.push_str(SSE_DONE);

            let body = futures::stream::once(async move { Ok::<_, Infallible>(first) }).chain(
                futures::stream::once(async move {
                    gate.notified().await;
                    Ok::<_, Infallible>(tail)
                }),
            );
            event_stream(Body::from_stream(body))
        }
        Script::Status(status, message) => (status, message).into_response(),
    }
}

/// Spawns the fake backend and returns its address.
async fn spawn_fake_backend(fake: FakeBackend) -> SocketAddr {
    let router = Router::new()
        .route("/v1/chat/completions", post(fake_completions))
        .with_state(fake);
    spawn(router).await
}

// ============================================================================
// Server helpers
// ============================================================================

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    addr
}

/// Spawns PyGuide pointed at `backend_url` and returns its base URL.
async fn spawn_pyguide(backend_url: String) -> String {
    let mut config = Config::default();
    config.backend.base_url = backend_url;
    let state = AppState::new(config).expect("Failed to build app state");
    let addr = spawn(create_router(state)).await;
    format!("http://{addr}")
}

/// Starts a fake backend with `script` and a PyGuide server in front of it.
async fn spawn_stack(script: Script) -> (String, FakeBackend) {
    let fake = FakeBackend::new(script);
    let backend_addr = spawn_fake_backend(fake.clone()).await;
    let pyguide = spawn_pyguide(format!("http://{backend_addr}/v1")).await;
    (pyguide, fake)
}

async fn post_debug(base: &str, form: &[(&str, &str)]) -> reqwest::Response {
    timeout(
        Duration::from_secs(10),
        reqwest::Client::new()
            .post(format!("{base}/debug"))
            .form(form)
            .send(),
    )
    .await
    .expect("Timeout waiting for response")
    .expect("Request failed")
}

async fn read_body(response: reqwest::Response) -> String {
    timeout(Duration::from_secs(10), response.text())
        .await
        .expect("Timeout reading body")
        .expect("Failed to read body")
}

// ============================================================================
// Streaming behavior
// ============================================================================

#[tokio::test]
async fn test_fragments_are_relayed_in_order() {
    let (base, _) = spawn_stack(Script::Deltas(vec!["Hello", "", " world"])).await;

    let response = post_debug(&base, &[("problem", "p"), ("code", "c")]).await;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()[reqwest::header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(read_body(response).await, "Hello world");
}

#[tokio::test]
async fn test_first_fragment_arrives_before_backend_finishes() {
    let gate = Arc::new(Notify::new());
    let (base, _) = spawn_stack(Script::Gated(
        "Let's look",
        vec![" at line 1."],
        Arc::clone(&gate),
    ))
    .await;

    let response = post_debug(&base, &[("problem", "p"), ("code", "c")]).await;
    let mut body = response.bytes_stream();

    let first = timeout(Duration::from_secs(5), body.next())
        .await
        .expect("First fragment was buffered")
        .expect("Body ended early")
        .expect("Body error");
    assert_eq!(&first[..], b"Let's look");

    gate.notify_one();

    let mut rest = Vec::new();
    while let Some(chunk) = timeout(Duration::from_secs(5), body.next())
        .await
        .expect("Timeout waiting for rest")
    {
        rest.extend_from_slice(&chunk.expect("Body error"));
    }
    assert_eq!(rest, b" at line 1.");
}

#[tokio::test]
async fn test_backend_receives_composed_request() {
    let (base, fake) = spawn_stack(Script::Deltas(vec!["ok"])).await;

    let response = post_debug(
        &base,
        &[
            ("problem", "sum two numbers"),
            ("code", "def add(a,b): return a-b"),
            ("skill", "Advanced"),
        ],
    )
    .await;
    let _ = read_body(response).await;

    let captured = fake.captured();
    assert_eq!(captured.len(), 1);
    let request = &captured[0];
    assert_eq!(request.authorization.as_deref(), Some("Bearer ollama"));

    let body = &request.body;
    assert_eq!(body["model"], "phi3");
    assert_eq!(body["stream"], true);
    let temperature = body["temperature"].as_f64().expect("temperature");
    assert!((temperature - 0.3).abs() < 1e-6);

    let messages = body["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["role"], "user");

    let system = messages[0]["content"].as_str().expect("system content");
    assert!(system.contains("skill level as 'Advanced'"));
    assert!(system.contains("algorithmic efficiency"));
    assert!(!system.contains("variable initialization"));

    let user = messages[1]["content"].as_str().expect("user content");
    assert!(user.contains("sum two numbers"));
    assert!(user.contains("```python\ndef add(a,b): return a-b\n```"));
}

#[tokio::test]
async fn test_missing_skill_behaves_like_beginner() {
    let (base, fake) = spawn_stack(Script::Deltas(vec!["hint"])).await;

    let without = post_debug(&base, &[("problem", "p"), ("code", "c")]).await;
    let without = read_body(without).await;
    let with = post_debug(&base, &[("problem", "p"), ("code", "c"), ("skill", "Beginner")]).await;
    let with = read_body(with).await;

    assert_eq!(without, with);
    let captured = fake.captured();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].body["messages"], captured[1].body["messages"]);
}

#[tokio::test]
async fn test_multipart_form_is_accepted() {
    let (base, fake) = spawn_stack(Script::Deltas(vec!["hint"])).await;

    let boundary = "pyguide-integration-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"problem\"\r\n\r\n\
         sum two numbers\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"code\"\r\n\r\n\
         def add(a,b): return a-b\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"skill\"\r\n\r\n\
         Intermediate\r\n\
         --{boundary}--\r\n"
    );

    let response = timeout(
        Duration::from_secs(10),
        reqwest::Client::new()
            .post(format!("{base}/debug"))
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send(),
    )
    .await
    .expect("Timeout waiting for response")
    .expect("Request failed");
    assert_eq!(read_body(response).await, "hint");

    let captured = fake.captured();
    let messages = &captured[0].body["messages"];
    let system = messages[0]["content"].as_str().expect("system content");
    let user = messages[1]["content"].as_str().expect("user content");
    assert!(system.contains("skill level as 'Intermediate'"));
    assert!(user.contains("sum two numbers"));
    assert!(user.contains("def add(a,b): return a-b"));
}

// ============================================================================
// Failure conversion
// ============================================================================

#[tokio::test]
async fn test_mid_stream_failure_appends_one_error_fragment() {
    let (base, _) = spawn_stack(Script::DeltasThenGarbage(vec!["Partial "])).await;

    let response = post_debug(&base, &[("problem", "p"), ("code", "c")]).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body = read_body(response).await;
    assert!(body.starts_with(&format!("Partial {ERROR_PREFIX}")), "{body}");
    assert_eq!(body.matches("**An error occurred:**").count(), 1);
    assert!(body.ends_with(
        "Please ensure the Ollama server is running and the model is available."
    ));
}

#[tokio::test]
async fn test_backend_error_status_becomes_error_text() {
    let (base, _) = spawn_stack(Script::Status(
        StatusCode::NOT_FOUND,
        "model \"phi3\" not found, try pulling it first",
    ))
    .await;

    let response = post_debug(&base, &[("problem", "p"), ("code", "c")]).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body = read_body(response).await;
    assert!(body.starts_with(ERROR_PREFIX), "{body}");
    assert!(body.contains("HTTP 404"));
    assert!(body.contains("not found, try pulling it first"));
}

#[tokio::test]
async fn test_unreachable_backend_becomes_error_text() {
    let dead_port = find_available_port();
    let base = spawn_pyguide(format!("http://127.0.0.1:{dead_port}/v1")).await;

    let response = post_debug(&base, &[("problem", "p"), ("code", "c")]).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body = read_body(response).await;
    assert!(body.starts_with("\n\n**An error occurred:**"), "{body}");
    assert!(body.contains("Connection error"));
    assert!(body.ends_with(
        "Please ensure the Ollama server is running and the model is available."
    ));
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[tokio::test]
async fn test_socratic_hint_scenario() {
    let (base, _) = spawn_stack(Script::Deltas(vec![
        "Nice work getting a function ",
        "defined, that's a solid start!\n\n",
        "**Let's trace it together:**\n\n",
        "- What should `add(2, 3)` return?\n",
        "- What does your function return for those inputs?\n\n",
        "Try adding a `print()` inside `add` to compare. ",
        "Which operator is doing the work on that line, ",
        "and is it the one the problem asks for?",
    ]))
    .await;

    let response = post_debug(
        &base,
        &[
            ("problem", "sum two numbers"),
            ("code", "def add(a,b): return a-b"),
            ("skill", "Intermediate"),
        ],
    )
    .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let text = read_body(response).await;
    assert!(!text.contains(ERROR_PREFIX));
    assert_eq!(text.matches("```").count() % 2, 0, "unbalanced code fences");
    assert!(!text.contains("a+b"));
    assert!(!text.contains("a + b"));

    let last_line = text.lines().last().expect("empty answer");
    assert!(last_line.trim_end().ends_with('?'), "{last_line}");
}

// ============================================================================
// Page
// ============================================================================

#[tokio::test]
async fn test_index_page_is_served() {
    let (base, _) = spawn_stack(Script::Deltas(vec![])).await;

    let response = reqwest::get(format!("{base}/"))
        .await
        .expect("Request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let page = read_body(response).await;
    assert!(page.contains("<form"));
    assert!(page.contains("name=\"skill\""));
}
