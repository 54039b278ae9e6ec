//! Test utilities for basket-core
//!
//! A mock model server that speaks both the OpenAI-compatible chat API and the
//! Ollama generate API. Responses depend on the prompt content, matching the
//! templates in `prompts/*.md`, and come back wrapped in code fences the way
//! real models tend to answer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

/// Bytes served at `/images/receipt.jpg` (a JPEG header is enough for sniffing)
pub const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

#[derive(Default)]
struct MockState {
    fail: bool,
    last_request: Mutex<Option<Value>>,
    calls: AtomicUsize,
}

/// Mock model server for tests
pub struct MockChatServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockChatServer {
    /// Start a server that answers every model call
    pub async fn start() -> Self {
        Self::spawn(MockState::default()).await
    }

    /// Start a server whose model endpoints all return HTTP 500
    pub async fn start_failing() -> Self {
        Self::spawn(MockState {
            fail: true,
            ..Default::default()
        })
        .await
    }

    async fn spawn(state: MockState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/v1/models", get(handle_models))
            .route("/v1/chat/completions", post(handle_chat))
            .route("/api/tags", get(handle_models))
            .route("/api/generate", post(handle_generate))
            .route("/images/receipt.jpg", get(handle_image))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Base URL for this server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of the fake receipt image
    pub fn image_url(&self) -> String {
        format!("{}/images/receipt.jpg", self.url())
    }

    /// Body of the most recent model request
    pub fn last_request(&self) -> Option<Value> {
        self.state.last_request.lock().unwrap().clone()
    }

    /// Number of model requests received
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockChatServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_models(State(state): State<Arc<MockState>>) -> Response {
    if state.fail {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({ "data": [{ "id": "vision-test" }], "models": [{ "name": "vision-test" }] }))
        .into_response()
}

async fn handle_image() -> Response {
    ([("content-type", "image/jpeg")], FAKE_JPEG.to_vec()).into_response()
}

async fn handle_chat(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_request.lock().unwrap() = Some(request.clone());
    if state.fail {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
    }

    let prompt = chat_user_text(&request);
    let content = respond_to(&prompt);
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
    .into_response()
}

async fn handle_generate(
    State(state): State<Arc<MockState>>,
    Json(request): Json<Value>,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    *state.last_request.lock().unwrap() = Some(request.clone());
    if state.fail {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
    }

    let prompt = request["prompt"].as_str().unwrap_or_default().to_string();
    Json(json!({
        "model": request["model"],
        "response": respond_to(&prompt),
        "done": true
    }))
    .into_response()
}

/// Concatenated text of the user message(s) in a chat request
fn chat_user_text(request: &Value) -> String {
    let mut text = String::new();
    for message in request["messages"].as_array().into_iter().flatten() {
        if message["role"] != "user" {
            continue;
        }
        match &message["content"] {
            Value::String(s) => text.push_str(s),
            Value::Array(parts) => {
                for part in parts {
                    if let Some(s) = part["text"].as_str() {
                        text.push_str(s);
                    }
                }
            }
            _ => {}
        }
    }
    text
}

/// Pick a canned answer based on which prompt template was rendered
fn respond_to(prompt: &str) -> String {
    if prompt.contains("Correct and translate") {
        fenced(&translation_response(prompt))
    } else if prompt.contains("Extract the receipt") {
        fenced(&extraction_response())
    } else {
        "I am not sure what you want.".to_string()
    }
}

fn fenced(body: &Value) -> String {
    format!("```json\n{}\n```", serde_json::to_string_pretty(body).unwrap())
}

fn extraction_response() -> Value {
    json!({
        "store_name": "Corner Market",
        "purchase_date": "03/14/2024",
        "total_amount": 2.49,
        "currency_code": null,
        "currency_evidence": "$",
        "items": [
            {
                "name": "GTRD FRST BOISS",
                "unit_price": 2.49,
                "quantity": 1,
                "category_id": 7,
                "discount_amount": 0,
                "original_unit_price": null
            }
        ]
    })
}

/// Names are the first JSON array after the instruction line
fn requested_names(prompt: &str) -> Vec<String> {
    let Some(start) = prompt.find("item names:") else {
        return Vec::new();
    };
    let rest = &prompt[start..];
    let (Some(open), Some(close)) = (rest.find('['), rest.find(']')) else {
        return Vec::new();
    };
    serde_json::from_str(&rest[open..=close]).unwrap_or_default()
}

fn translation_response(prompt: &str) -> Value {
    let items: Vec<Value> = requested_names(prompt)
        .into_iter()
        .map(|name| {
            let (corrected, readable, category) = match name.to_uppercase().as_str() {
                "GTRD FRST BOISS" | "GATORADE FROST GLACIER" => (
                    "Gatorade Frost Glacier Freeze".to_string(),
                    "Gatorade Frost Glacier".to_string(),
                    Some(7),
                ),
                "VOLLMILCH" => ("Vollmilch".to_string(), "Whole Milk".to_string(), Some(2)),
                _ => (title_case(&name), title_case(&name), None),
            };
            json!({
                "raw_name": name,
                "corrected_name": corrected,
                "readable_name": readable,
                "category_id": category
            })
        })
        .collect();
    json!({ "items": items })
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
