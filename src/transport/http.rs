//! HTTP + server-sent events transport.
//!
//! ## API surface
//!
//! | Method | Path                       | Auth | Description                                   |
//! |--------|----------------------------|------|-----------------------------------------------|
//! | GET    | `/health`                  | No   | Liveness check                                |
//! | POST   | `/jsonrpc`                 | Yes  | Dispatch an envelope, respond inline          |
//! | GET    | `/sse`                     | Yes  | Open an event subscription                    |
//! | POST   | `/messages?session_id=<id>`| Yes  | Dispatch, deliver the response on the stream  |
//! | POST   | `/send/{session_id}`       | Yes  | Push an arbitrary event to one subscription   |
//!
//! Every request is handled on its own task, so a slow appliance call only
//! delays the peer that made it. If the peer disconnects mid-request the
//! handler future is dropped, which aborts the tool invocation.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{self, AuthGuard};
use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::subscriptions::{HubError, Outbound, SubscriptionHub, SubscriptionState};

/// Shared state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub hub: SubscriptionHub,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    pub keepalive: Duration,
}

/// Rule-change notifications waiting to be relayed to subscribers.
const CHANGE_FEED_CAPACITY: usize = 64;

impl AppState {
    /// Must be called inside a Tokio runtime: spawns the task that relays
    /// the dispatcher's change feed to every open subscription.
    pub fn new(dispatcher: Dispatcher, config: &ServerConfig) -> Self {
        let hub = SubscriptionHub::new(config.max_subscriptions, config.subscription_buffer);
        let (feed, changes) = mpsc::channel(CHANGE_FEED_CAPACITY);
        tokio::spawn(hub.clone().relay(changes));
        Self {
            dispatcher: Arc::new(dispatcher.with_change_feed(feed)),
            hub,
            start_time: Instant::now(),
            keepalive: Duration::from_secs(config.keepalive_secs.max(1)),
        }
    }
}

pub fn router(state: AppState, guard: Arc<AuthGuard>, cors: bool) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let authed_routes = Router::new()
        .route("/jsonrpc", post(jsonrpc))
        .route("/sse", get(event_stream))
        .route("/messages", post(messages))
        .route("/send/{session_id}", post(send))
        .layer(middleware::from_fn_with_state(guard, auth::require_bearer));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .layer(TraceLayer::new_for_http());
    if cors {
        app = app.layer(CorsLayer::permissive());
    }
    app.with_state(state)
}

/// Bind `listen` and serve until `shutdown` resolves.
pub async fn serve(
    listen: &str,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `GET /health`: no authentication.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "subscriptions": state.hub.len(),
        "tools": state.dispatcher.registry().len(),
    }))
}

/// `POST /jsonrpc`: the body is taken raw so malformed JSON is answered
/// with a ParseError envelope rather than an HTTP rejection.
async fn jsonrpc(State(state): State<AppState>, body: String) -> Response {
    match state.dispatcher.dispatch_str(&body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /sse`: open a subscription. The first event, `endpoint`, tells the
/// client where to POST requests whose responses should arrive here.
async fn event_stream(State(state): State<AppState>) -> Response {
    let subscription = match state.hub.open() {
        Ok(s) => s,
        Err(e @ HubError::Full(_)) => {
            warn!("{e}");
            return error_response(StatusCode::TOO_MANY_REQUESTS, "Too many subscriptions");
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let id = subscription.id();
    let endpoint = Outbound::new("endpoint", format!("/messages?session_id={id}"));
    if let Err(e) = state.hub.activate(id, endpoint) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let stream = subscription.map(|out| Ok::<Event, Infallible>(to_event(out)));
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.keepalive))
        .into_response()
}

fn to_event(out: Outbound) -> Event {
    let mut event = Event::default().event(out.event).data(out.data);
    if let Some(id) = out.id {
        event = event.id(id);
    }
    event
}

#[derive(Deserialize)]
struct MessagesQuery {
    session_id: String,
}

/// `POST /messages?session_id=<id>`: dispatch and deliver on the stream.
async fn messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let Ok(id) = Uuid::parse_str(&query.session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown session");
    };
    if state.hub.state(id) == SubscriptionState::Closed {
        return error_response(StatusCode::NOT_FOUND, "Unknown session");
    }

    if let Some(response) = state.dispatcher.dispatch_str(&body).await {
        if let Err(e) = state.hub.push(id, Outbound::envelope(&response)) {
            debug!(%id, error = %e, "response not delivered");
            return hub_error_response(&e);
        }
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

#[derive(Deserialize)]
struct SendBody {
    event: Option<String>,
    id: Option<String>,
    #[serde(default)]
    data: Value,
}

/// `POST /send/{session_id}`: push an arbitrary event.
async fn send(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SendBody>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown session");
    };
    let has_break =
        |s: &Option<String>| s.as_deref().is_some_and(|v| v.contains(['\n', '\r', '\0']));
    if has_break(&body.event) || has_break(&body.id) {
        return error_response(StatusCode::BAD_REQUEST, "event and id must be single-line");
    }

    let data = if body.data.is_null() { json!({}) } else { body.data };
    let out = Outbound {
        event: body.event.unwrap_or_else(|| "message".to_string()),
        id: body.id,
        data: data.to_string(),
    };
    match state.hub.push(id, out) {
        Ok(()) => Json(json!({ "status": "sent" })).into_response(),
        Err(e) => hub_error_response(&e),
    }
}

fn hub_error_response(e: &HubError) -> Response {
    match e {
        HubError::NotFound(_) | HubError::Closed(_) => {
            error_response(StatusCode::NOT_FOUND, "Unknown session")
        }
        HubError::NotOpen(_) => error_response(StatusCode::CONFLICT, e.to_string()),
        HubError::Full(_) => error_response(StatusCode::TOO_MANY_REQUESTS, e.to_string()),
    }
}
