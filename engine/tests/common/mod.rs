//! Common Test Utilities for Integration Tests
//!
//! Starts a stub OpenAI-compatible endpoint on an ephemeral port and builds
//! run configurations pointing at it.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use kvmini_engine::config::{FairnessConfig, LoadTestConfig, ScheduleConfig, TenantConfig};
use kvmini_engine::executor::{ChatRequest, ClientConfig, DecodingParams};
use kvmini_engine::guard::GuardConfig;
use kvmini_engine::schedule::ArrivalPattern;
use kvmini_engine::TenantId;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

/// Behaviour of the stub endpoint
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Delay before the response (or its first chunk) is sent
    pub delay: Duration,
    pub status: StatusCode,
    /// Content chunks sent before the usage chunk when streaming
    pub chunks: usize,
    /// Gap between streamed chunks
    pub chunk_gap: Duration,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
            status: StatusCode::OK,
            chunks: 4,
            chunk_gap: Duration::from_millis(10),
        }
    }
}

/// What the stub saw
#[derive(Debug, Default)]
pub struct StubStats {
    pub hits: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub last_auth: Mutex<Option<String>>,
    pub last_payload: Mutex<Option<Value>>,
}

struct StubState {
    config: StubConfig,
    stats: Arc<StubStats>,
}

pub struct StubServer {
    pub url: String,
    pub stats: Arc<StubStats>,
    handle: JoinHandle<()>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn usage() -> Value {
    json!({"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12})
}

async fn chat_completions(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let stats = &state.stats;
    stats.hits.fetch_add(1, Ordering::SeqCst);
    let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
    *stats.last_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let stream = payload["stream"] == json!(true);
    *stats.last_payload.lock().unwrap() = Some(payload);

    tokio::time::sleep(state.config.delay).await;
    stats.in_flight.fetch_sub(1, Ordering::SeqCst);

    if state.config.status != StatusCode::OK {
        return (state.config.status, "upstream overloaded").into_response();
    }

    if !stream {
        return Json(json!({
            "id": "chatcmpl-stub",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}],
            "usage": usage(),
        }))
        .into_response();
    }

    let chunks = state.config.chunks;
    let gap = state.config.chunk_gap;
    let events = futures_util::stream::unfold(0usize, move |i| async move {
        if i > chunks + 1 {
            return None;
        }
        if i > 0 {
            tokio::time::sleep(gap).await;
        }
        let event = if i < chunks {
            json!({"id": "chatcmpl-stub", "choices": [{"delta": {"content": "tok"}}]}).to_string()
        } else if i == chunks {
            json!({"id": "chatcmpl-stub", "choices": [], "usage": usage()}).to_string()
        } else {
            "[DONE]".to_string()
        };
        let frame = Bytes::from(format!("data: {event}\n\n"));
        Some((Ok::<Bytes, std::io::Error>(frame), i + 1))
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(events))
        .unwrap()
}

/// Start the stub endpoint on an ephemeral port
pub async fn spawn_stub(config: StubConfig) -> StubServer {
    let stats = Arc::new(StubStats::default());
    let state = Arc::new(StubState {
        config,
        stats: Arc::clone(&stats),
    });
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubServer {
        url: format!("http://{addr}"),
        stats,
        handle,
    }
}

/// Fresh, empty directory for a test's artifacts
pub fn temp_run_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("kvmini-it-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

pub fn client(url: &str) -> ClientConfig {
    ClientConfig {
        url: url.to_string(),
        api_key: None,
        insecure: false,
        timeout: Duration::from_secs(10),
    }
}

pub fn chat_request(stream: bool) -> ChatRequest {
    ChatRequest {
        model: "stub-model".to_string(),
        prompt: "Hello, world!".to_string(),
        max_tokens: 16,
        stream,
        decoding: DecodingParams::default(),
    }
}

/// Steady load test sized for a fast stub
pub fn loadtest_config(
    url: &str,
    requests: usize,
    concurrency: usize,
    run_dir: PathBuf,
) -> LoadTestConfig {
    LoadTestConfig {
        client: client(url),
        request: chat_request(false),
        requests,
        concurrency,
        schedule: ScheduleConfig {
            pattern: ArrivalPattern::Steady,
            duration_sec: None,
            rate: None,
            assumed_latency: Duration::from_millis(50),
            seed: Some(42),
        },
        run_dir,
        throttle_delay: Duration::from_millis(10),
    }
}

/// Two-tenant run with B constrained
pub fn fairness_config(
    url: &str,
    tenants: [(usize, usize); 2],
    guard: GuardConfig,
    schedule: Option<ScheduleConfig>,
    run_dir: PathBuf,
) -> FairnessConfig {
    let [(a_requests, a_concurrency), (b_requests, b_concurrency)] = tenants;
    FairnessConfig {
        client: client(url),
        request: chat_request(false),
        tenants: vec![
            TenantConfig {
                id: TenantId::new("A"),
                requests: a_requests,
                concurrency: a_concurrency,
            },
            TenantConfig {
                id: TenantId::new("B"),
                requests: b_requests,
                concurrency: b_concurrency,
            },
        ],
        constrained: TenantId::new("B"),
        guard,
        schedule,
        run_dir,
        throttle_delay: Duration::from_millis(10),
    }
}

/// Initialize test logging (call once per test module)
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvmini_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
