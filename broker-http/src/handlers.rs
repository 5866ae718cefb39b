use crate::error::Error;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use broker_fanout::{dispatch, StreamHandle};
use broker_gossip::receive_gossip;
use broker_types::{
    ElectionRequest, ElectionResponse, GossipPayload, LeaderAnnouncement, LeaderQueryResponse,
    LogsResponse, Message, SubscriptionRequest,
};
use futures::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::UnboundedReceiverStream;

fn ok_message(message: impl Into<String>) -> Response {
    (StatusCode::OK, Json(json!({ "message": message.into() }))).into_response()
}

/// `POST /publish`. Forwards to the current leader when it is known and is not self;
/// otherwise enqueues, logs and fans out locally (self is leader, or no leader is known yet
/// and the broker accepts best-effort).
pub async fn publish(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Response, Error> {
    let topic = body
        .get("topic")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::BadRequest("No topic specified".to_string()))?
        .to_string();

    let self_id = state.registry.self_id();
    if let Some(leader_id) = state.leadership.current_leader() {
        if leader_id != self_id {
            let addr = state
                .registry
                .address_of(leader_id)
                .ok_or_else(|| Error::Internal("Unknown leader ID".to_string()))?;
            return match state.rpc.forward_publish(&addr, &body).await {
                Ok((status, value)) => {
                    let status = StatusCode::from_u16(status.as_u16())
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    Ok((status, Json(value)).into_response())
                }
                Err(e) => Err(Error::Internal(format!("Failed to contact leader: {e}"))),
            };
        }
    }

    let msg = Message::new(body);
    let priority = msg.priority();
    state.store.enqueue(&topic, msg, priority);
    dispatch(&state.store, &topic, &state.log);
    Ok((StatusCode::OK, "").into_response())
}

/// `POST /subscribe`. `mode: "sse"` registers the caller's remote address as a live
/// subscriber; `mode: "webhook"` (or an absent mode) registers a `(topic, url)` pair.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<Response, Error> {
    let topic = req
        .topic
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::BadRequest("Missing topic".to_string()))?;

    match req.mode.as_deref() {
        Some("sse") => {
            state.store.add_subscriber(&topic, addr.ip().to_string());
            Ok(ok_message(format!("Subscribed to topic '{topic}' via SSE")))
        }
        Some("webhook") | None => {
            let url = req
                .url
                .ok_or_else(|| Error::BadRequest("Missing URL for webhook subscription".to_string()))?;
            state.store.add_webhook(&topic, url);
            Ok(ok_message(format!("Subscribed to topic '{topic}' (webhook)")))
        }
        Some(other) => Err(Error::BadRequest(format!(
            "Unsupported subscription mode: {other}"
        ))),
    }
}

/// `POST /unsubscribe`. Idempotent: unsubscribing an unknown address or url returns 200
/// with a "not subscribed" message rather than an error.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<Response, Error> {
    let topic = req
        .topic
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::BadRequest("Missing topic".to_string()))?;

    match req.mode.as_deref() {
        Some("sse") => {
            state.store.remove_subscriber(&topic, &addr.ip().to_string());
            Ok(ok_message(format!("Unsubscribed from topic '{topic}' (SSE)")))
        }
        Some("webhook") | None => {
            let url = req.url.ok_or_else(|| {
                Error::BadRequest("Missing URL for webhook unsubscription".to_string())
            })?;
            if state.store.remove_webhook(&topic, &url) {
                Ok(ok_message(format!("Unsubscribed from topic '{topic}' (webhook)")))
            } else {
                Ok(ok_message(format!(
                    "Not subscribed to '{topic}' with URL '{url}'"
                )))
            }
        }
        Some(other) => Err(Error::BadRequest(format!(
            "Unsupported unsubscription mode: {other}"
        ))),
    }
}

/// Keeps a `StreamHandle` alive for exactly as long as the wrapped receiver stream is
/// polled, so the fan-out cleanup (detach queue, move address to unsubscribed) runs the
/// instant the SSE body is dropped — on client disconnect or write failure alike.
struct StreamGuard {
    _handle: StreamHandle,
    inner: UnboundedReceiverStream<String>,
}

impl Stream for StreamGuard {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// `GET /stream/<topic>`. Opens a push-stream: registers a fresh delivery queue and the
/// caller's address as a subscriber, then emits `data: <json>\n\n` for every message the
/// fan-out engine dispatches to this topic until the client disconnects.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (handle, rx) = StreamHandle::attach(state.store.clone(), topic, addr.ip().to_string());
    let guard = StreamGuard {
        _handle: handle,
        inner: UnboundedReceiverStream::new(rx),
    };
    let events = futures::StreamExt::map(guard, |payload| Ok(Event::default().data(payload)));
    Sse::new(events)
}

/// `POST /gossip`. Merges an inbound soft-state payload into the local store.
pub async fn gossip(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GossipPayload>,
) -> &'static str {
    receive_gossip(&state.store, &payload);
    "OK"
}

/// `POST /election`. Bully challenge responder.
pub async fn election(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ElectionRequest>,
) -> Json<ElectionResponse> {
    let response = state.leadership.on_election_message(req.broker_id);
    Json(ElectionResponse { response })
}

/// `POST /leader`. Receives a leader announcement; last write wins.
pub async fn leader_announcement(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LeaderAnnouncement>,
) -> StatusCode {
    state.leadership.on_leader_announcement(req.leader_id);
    StatusCode::OK
}

/// `GET /get_leader`.
pub async fn get_leader(State(state): State<Arc<AppState>>) -> Json<LeaderQueryResponse> {
    Json(LeaderQueryResponse {
        leader_id: state.leadership.current_leader(),
    })
}

/// `POST /start_election`. Operator hook to force an election; blocks until the election
/// this call initiated has concluded, matching the original's synchronous handler.
pub async fn start_election(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.leadership.start_election().await;
    Json(json!({ "status": "started" }))
}

/// `GET /ping`. Liveness probe used by the health monitor.
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// `GET /health`. Plain liveness check, distinct from `/ping`.
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /logs/<topic>`. Returns up to the last 1000 accepted messages for `topic`.
pub async fn logs(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> Json<LogsResponse> {
    let logs = state.store.snapshot_log(&topic);
    Json(LogsResponse { topic, logs })
}

/// `GET /version`. Ambient build-identity endpoint, not in the distilled spec but present
/// on every HTTP surface in the teacher repo (`GET /eth/v1/node/version`).
pub async fn version(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "broker_id": state.registry.self_id(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn not_found() -> Error {
    Error::NotFound
}
