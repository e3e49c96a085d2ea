use crate::config::BridgeConfig;
use crate::decode::decoder_for;
use crate::logging::{SessionLog, SessionOutcome, SessionRecord};
use crate::message::ChatRequest;
use crate::relay::{self, RelayHooks, StreamRelay};
use crate::upstream;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::DuplexStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Bytes buffered between the relay writer and the response body.
const PIPE_CAPACITY: usize = 16 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub client: reqwest::Client,
    pub sessions: SessionLog,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/stream", post(handle_chat_stream))
        .route("/v1/sessions", get(handle_sessions))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let session_id = Uuid::new_v4();
    let started_at = chrono::Utc::now();
    let model = state.config.resolve_model(&req.model).to_string();

    info!(session = %session_id, model = %model, messages = req.messages.len(), "Stream request");

    let response = match upstream::open_stream(&req, &state.config, &state.client).await {
        Ok(r) => r,
        Err(e) => {
            error!(session = %session_id, error = %e, "Streaming setup error");
            state.sessions.record(
                SessionRecord::new(session_id, started_at, &state.config.provider.name, &model)
                    .with_detail(SessionOutcome::Failed, e.to_string()),
            );
            let body = serde_json::json!({
                "error": { "type": "upstream_error", "message": e.to_string() }
            });
            return (StatusCode::BAD_GATEWAY, Json(body)).into_response();
        }
    };

    let cancel = CancellationToken::new();
    let (sender, relay) = relay::channel(&state.config.relay_config(), cancel.clone());

    let vendor = decoder_for(state.config.vendor_format());
    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        let report = upstream::pump(response, vendor, sender, producer_cancel).await;
        debug!(
            session = %session_id,
            events = report.events_sent,
            tool_calls = report.tool_calls.len(),
            "Producer finished"
        );
    });

    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let record = SessionRecord::new(session_id, started_at, &state.config.provider.name, &model);
    tokio::spawn(run_relay(relay, writer, state.sessions.clone(), record));

    let body = CancelOnDrop {
        _guard: cancel.drop_guard(),
        inner: ReaderStream::new(reader),
    };

    sse_response(Body::from_stream(body))
}

/// Response body that cancels its session when hyper drops it (client gone).
///
/// The guard is declared first so the token is cancelled before the pipe's
/// read half closes; the relay then sees a cancellation, not a write error.
struct CancelOnDrop<S> {
    _guard: DropGuard,
    inner: S,
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

async fn run_relay(
    relay: StreamRelay,
    mut writer: DuplexStream,
    sessions: SessionLog,
    record: SessionRecord,
) {
    let session = record.id;
    let hooks = RelayHooks::new()
        .on_cancel(move |stats| {
            info!(session = %session, events = stats.events_written, "Client went away");
        })
        .on_timeout(move |stats| {
            info!(session = %session, events = stats.events_written, "Producer went quiet");
        });

    let record = match relay.run(&mut writer, hooks).await {
        Ok(report) => record.with_report(&report),
        Err(e) => record.with_detail(SessionOutcome::WriteFailed, e.to_string()),
    };
    sessions.record(SessionRecord {
        finished_at: chrono::Utc::now(),
        ..record
    });
}

/// Wrap an SSE body with the headers push streaming needs.
pub fn sse_response(body: Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[derive(Debug, Deserialize)]
struct SessionsQuery {
    #[serde(default = "default_sessions_limit")]
    limit: usize,
}

fn default_sessions_limit() -> usize {
    50
}

async fn handle_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionsQuery>,
) -> Json<serde_json::Value> {
    let sessions = state.sessions.recent(query.limit);
    Json(serde_json::json!({ "data": sessions, "object": "list" }))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.config.provider.name,
    }))
}
