#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use artgen_client::{DecodedImage, ImageSink, JobClient, PollPolicy, RateLimiter};
use artgen_core::executor::capture;
use artgen_core::{ContextHandle, EndpointConfig, ForegroundQueue};
use artgen_engine::{RegistryConfig, TaskRegistry};
use artgen_events::{TaskEvent, TaskEventKind};

pub const API_KEY: &str = "test-key";

/// Poll policy scaled down so scenario tests finish in milliseconds.
pub const FAST: PollPolicy = PollPolicy {
    interval: Duration::from_millis(20),
    max_wait: Duration::from_secs(2),
};

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// A scripted reply for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16, String),
    /// 200 with a body that is not JSON.
    Raw(String),
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Reply::Json(value) => Json(value).into_response(),
            Reply::Status(code, body) => {
                let code = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (code, body).into_response()
            }
            Reply::Raw(body) => body.into_response(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Asset {
    Png(u32, u32),
    Status(u16),
    Garbage,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub at: Instant,
    pub auth: Option<String>,
    pub body: Value,
}

#[derive(Default)]
struct Script {
    submit: VecDeque<Reply>,
    submit_fallback: Option<Reply>,
    polls: VecDeque<Reply>,
    poll_fallback: Option<Reply>,
    assets: HashMap<String, Asset>,
    serverless: VecDeque<Reply>,
    submissions: Vec<Submission>,
    polled_ids: Vec<String>,
}

#[derive(Default)]
pub struct MockState {
    pub submit_hits: AtomicUsize,
    pub status_hits: AtomicUsize,
    pub asset_hits: AtomicUsize,
    pub cancel_hits: AtomicUsize,
    script: Mutex<Script>,
}

impl MockState {
    pub fn total_hits(&self) -> usize {
        self.submit_hits.load(Ordering::SeqCst)
            + self.status_hits.load(Ordering::SeqCst)
            + self.asset_hits.load(Ordering::SeqCst)
            + self.cancel_hits.load(Ordering::SeqCst)
    }
}

/// An in-process generation backend on `127.0.0.1:0`.
pub struct MockBackend {
    base: String,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/job", post(submit))
            .route("/job/status", post(status))
            .route("/assets/{name}", get(asset))
            .route("/sls/run", post(serverless_step))
            .route("/sls/status/{id}", get(serverless_status))
            .route("/sls/cancel/{id}", post(serverless_cancel))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn asset_url(&self, name: &str) -> String {
        self.url(&format!("/assets/{name}"))
    }

    pub fn config(&self, name: &str) -> Arc<EndpointConfig> {
        Arc::new(EndpointConfig::new(
            name,
            self.base.clone(),
            "/job",
            "/job/status",
            API_KEY,
        ))
    }

    pub fn serverless_config(&self) -> EndpointConfig {
        artgen_client::serverless::serverless_endpoint("sls", self.url("/sls"), API_KEY)
    }

    pub fn on_submit(&self, reply: Reply) {
        self.script().submit.push_back(reply);
    }

    /// Reply used once the queued submit replies are exhausted.
    pub fn on_every_submit(&self, reply: Reply) {
        self.script().submit_fallback = Some(reply);
    }

    pub fn on_poll(&self, reply: Reply) {
        self.script().polls.push_back(reply);
    }

    /// Reply used once the queued poll replies are exhausted.
    pub fn on_every_poll(&self, reply: Reply) {
        self.script().poll_fallback = Some(reply);
    }

    pub fn serve_asset(&self, name: &str, asset: Asset) {
        self.script().assets.insert(name.to_string(), asset);
    }

    /// Replies for the serverless `/run` and `/status/{id}` calls, in order.
    pub fn on_serverless(&self, reply: Reply) {
        self.script().serverless.push_back(reply);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.script().submissions.clone()
    }

    pub fn polled_ids(&self) -> Vec<String> {
        self.script().polled_ids.clone()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.state.script.lock().unwrap()
    }
}

async fn submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Reply {
    state.submit_hits.fetch_add(1, Ordering::SeqCst);
    let mut script = state.script.lock().unwrap();
    script.submissions.push(Submission {
        at: Instant::now(),
        auth: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    script
        .submit
        .pop_front()
        .or_else(|| script.submit_fallback.clone())
        .unwrap_or_else(|| Reply::Json(json!({"id": "job-1", "status": "queued"})))
}

async fn status(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Reply {
    state.status_hits.fetch_add(1, Ordering::SeqCst);
    let mut script = state.script.lock().unwrap();
    if let Some(id) = body.get("id").and_then(Value::as_str) {
        script.polled_ids.push(id.to_string());
    }
    script
        .polls
        .pop_front()
        .or_else(|| script.poll_fallback.clone())
        .unwrap_or_else(|| Reply::Json(json!({"status": "processing"})))
}

async fn asset(State(state): State<Arc<MockState>>, Path(name): Path<String>) -> Response {
    state.asset_hits.fetch_add(1, Ordering::SeqCst);
    let asset = state.script.lock().unwrap().assets.get(&name).cloned();
    match asset {
        Some(Asset::Png(w, h)) => ([(CONTENT_TYPE, "image/png")], png_bytes(w, h)).into_response(),
        Some(Asset::Status(code)) => Reply::Status(code, "asset unavailable".into()).into_response(),
        Some(Asset::Garbage) => "definitely not an image".into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serverless_step(State(state): State<Arc<MockState>>) -> Reply {
    state.submit_hits.fetch_add(1, Ordering::SeqCst);
    next_serverless(&state)
}

async fn serverless_status(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Reply {
    state.status_hits.fetch_add(1, Ordering::SeqCst);
    state.script.lock().unwrap().polled_ids.push(id);
    next_serverless(&state)
}

async fn serverless_cancel(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Reply {
    state.cancel_hits.fetch_add(1, Ordering::SeqCst);
    Reply::Json(json!({"id": id, "status": "CANCELLED"}))
}

fn next_serverless(state: &MockState) -> Reply {
    state
        .script
        .lock()
        .unwrap()
        .serverless
        .pop_front()
        .unwrap_or_else(|| Reply::Json(json!({"id": "run-1", "status": "IN_PROGRESS"})))
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut png = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .expect("encode png");
    png
}

// ---------------------------------------------------------------------------
// Registry and sink helpers
// ---------------------------------------------------------------------------

/// Build a registry whose owning context is the calling thread.
pub fn test_registry(
    poll: PollPolicy,
    min_interval: Duration,
) -> (Arc<TaskRegistry>, ForegroundQueue, ContextHandle) {
    let (ctx, queue) = capture().expect("tests run inside a Tokio runtime");
    let client = JobClient::new(Arc::new(RateLimiter::new(min_interval)));
    let registry = TaskRegistry::new(client, ctx.clone(), RegistryConfig { poll });
    (Arc::new(registry), queue, ctx)
}

/// Records every delivery and checks it happens on the owning thread.
pub struct RecordingSink {
    ctx: ContextHandle,
    pub items: Mutex<Vec<(usize, String, (u32, u32))>>,
    pub batches: Mutex<Vec<Vec<String>>>,
    pub off_owner: AtomicUsize,
    pub overlaps: AtomicUsize,
    in_flight: AtomicUsize,
}

impl RecordingSink {
    pub fn new(ctx: &ContextHandle) -> Arc<Self> {
        Arc::new(Self {
            ctx: ctx.clone(),
            items: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            off_owner: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn item_indices(&self) -> Vec<usize> {
        self.items.lock().unwrap().iter().map(|(i, _, _)| *i).collect()
    }

    fn enter(&self) {
        if !self.ctx.is_owner_thread() {
            self.off_owner.fetch_add(1, Ordering::SeqCst);
        }
        if self.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ImageSink for RecordingSink {
    fn on_image_ready(&self, index: usize, image: Arc<DecodedImage>) {
        self.enter();
        std::thread::sleep(Duration::from_millis(2));
        self.items
            .lock()
            .unwrap()
            .push((index, image.url.clone(), image.dimensions()));
        self.leave();
    }

    fn on_images_ready(&self, images: Vec<Arc<DecodedImage>>) {
        self.enter();
        self.batches
            .lock()
            .unwrap()
            .push(images.iter().map(|i| i.url.clone()).collect());
        self.leave();
    }
}

/// Everything currently buffered on an event receiver.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[TaskEvent]) -> Vec<TaskEventKind> {
    events.iter().map(|e| e.kind).collect()
}
