//! REST and WebSocket upgrade handlers.
//!
//! Streams are created and closed over REST; producers attach at
//! `/ws/mobile/{streamId}` and subscribers at `/ws/viewer/{streamId}`. Both
//! upgrade routes run the admission check before the handshake completes, so a
//! missing or closed stream is refused with a plain HTTP status.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use velocity_core::{FeatureFlags, PeerMetadata, SessionId, SessionRecord};

use crate::error::ApiError;
use crate::server::AppState;
use crate::websocket::connection::ClientConnection;
use crate::websocket::dispatch::bounded;
use crate::websocket::pump::run_connection;

// ─────────────────────────────────────────────────────────────────────────────
// Response bodies
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/streams`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedStream {
    /// The new stream id.
    pub stream_id: SessionId,
    /// Human-readable status.
    pub message: &'static str,
}

/// Body of `GET /api/streams/{streamId}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamView {
    /// Stored lifecycle state.
    #[serde(flatten)]
    pub record: SessionRecord,
    /// Live subscriber count from the registry.
    pub viewer_count: usize,
}

/// Body of `DELETE /api/streams/{streamId}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedStream {
    /// Human-readable status.
    pub message: &'static str,
    /// The closed stream id.
    pub stream_id: SessionId,
    /// When the stream was closed.
    pub deleted_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// REST
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/streams
pub async fn create_stream(State(state): State<AppState>) -> Result<Json<CreatedStream>, ApiError> {
    let stream_id = SessionId::generate();
    let _record = bounded(state.op_timeout, state.store.create(&stream_id, Utc::now())).await?;
    info!(session_id = %stream_id, "stream created");
    Ok(Json(CreatedStream {
        stream_id,
        message: "Stream created successfully",
    }))
}

/// GET /api/streams/{streamId}
pub async fn get_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<StreamView>, ApiError> {
    let stream_id = SessionId::from(stream_id);
    let record = bounded(state.op_timeout, state.store.get(&stream_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Stream not found".into()))?;
    let viewer_count = state.registry.viewer_count(&stream_id);
    Ok(Json(StreamView {
        record,
        viewer_count,
    }))
}

/// DELETE /api/streams/{streamId}
///
/// Closes the stream in the store, then disconnects everyone still attached.
pub async fn delete_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<DeletedStream>, ApiError> {
    let stream_id = SessionId::from(stream_id);
    if bounded(state.op_timeout, state.store.get(&stream_id))
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound("Stream not found".into()));
    }

    // The store only closes an open row, so a concurrent delete loses here.
    let deleted_at = Utc::now();
    let closed = bounded(state.op_timeout, state.store.mark_deleted(&stream_id, deleted_at)).await?;
    if !closed {
        return Err(ApiError::BadRequest("Stream already deleted".into()));
    }
    let disconnected = state.registry.close_session(&stream_id);
    info!(session_id = %stream_id, disconnected, "stream deleted");

    Ok(Json(DeletedStream {
        message: "Stream deleted successfully",
        stream_id,
        deleted_at,
    }))
}

/// GET /api/feature-flags
pub async fn feature_flags(State(state): State<AppState>) -> Result<Json<FeatureFlags>, ApiError> {
    let flags = bounded(state.op_timeout, state.store.feature_flags()).await?;
    Ok(Json(flags))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket upgrade
// ─────────────────────────────────────────────────────────────────────────────

/// Subscriber metadata taken from the upgrade request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientPeer(pub PeerMetadata);

impl<S> FromRequestParts<S> for ClientPeer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let socket = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        Ok(Self(PeerMetadata {
            user_agent,
            ip_address: client_ip(&parts.headers, socket),
        }))
    }
}

/// Best-effort client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(first.to_owned());
    }
    if let Some(real) = header("x-real-ip") {
        return Some(real.to_owned());
    }
    socket.map(|addr| addr.ip().to_string())
}

/// Refuse streams that are missing or closed.
async fn admit(state: &AppState, stream_id: &SessionId) -> Result<(), ApiError> {
    match bounded(state.op_timeout, state.store.get(stream_id)).await? {
        None => Err(ApiError::NotFound("Stream not found".into())),
        Some(record) if record.is_deleted() => Err(ApiError::Gone("Stream has been closed".into())),
        Some(_) => Ok(()),
    }
}

/// Finish the handshake and hand the socket to the pumps.
fn upgrade<F>(ws: WebSocketUpgrade, state: AppState, build: F) -> Response
where
    F: FnOnce(mpsc::Sender<Arc<str>>) -> ClientConnection + Send + 'static,
{
    let pump = state.pump.clone();
    ws.max_message_size(pump.max_message_size)
        .on_upgrade(move |socket| async move {
            let (tx, rx) = mpsc::channel(pump.queue_capacity);
            let conn = Arc::new(build(tx));
            run_connection(socket, conn, rx, state.registry, pump).await;
        })
}

/// GET /ws/mobile/{streamId}: the producer endpoint.
pub async fn ws_mobile(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let stream_id = match path {
        Ok(Path(id)) => SessionId::from(id),
        Err(rejection) => return rejection.into_response(),
    };
    if let Err(e) = admit(&state, &stream_id).await {
        debug!(session_id = %stream_id, error = %e, "producer refused");
        return e.into_response();
    }
    match ws {
        Ok(ws) => upgrade(ws, state, move |tx| ClientConnection::producer(stream_id, tx)),
        Err(rejection) => rejection.into_response(),
    }
}

/// GET /ws/viewer/{streamId}: the subscriber endpoint.
pub async fn ws_viewer(
    State(state): State<AppState>,
    ClientPeer(peer): ClientPeer,
    path: Result<Path<String>, PathRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let stream_id = match path {
        Ok(Path(id)) => SessionId::from(id),
        Err(rejection) => return rejection.into_response(),
    };
    if let Err(e) = admit(&state, &stream_id).await {
        debug!(session_id = %stream_id, error = %e, "viewer refused");
        return e.into_response();
    }
    match ws {
        Ok(ws) => upgrade(ws, state, move |tx| {
            ClientConnection::subscriber(stream_id, peer, tx)
        }),
        Err(rejection) => rejection.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
