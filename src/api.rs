//! HTTP API server: administration routes and the live web-client socket.
//!
//! Spawned from `main` next to the gateway. Admin routes require a bearer
//! token when `api.api_key` is set; the WebSocket route does not.

use crate::gateway::{Gateway, NewBot};
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chorus_channels::web::{self, ClientEventHandler, Deadlines, HubHandle};
use chorus_core::{config::ApiConfig, error::ChorusError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
    hub: HubHandle,
    events: Arc<dyn ClientEventHandler>,
    deadlines: Deadlines,
    api_key: Option<String>,
    uptime: Instant,
    shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(
        gateway: Arc<Gateway>,
        hub: HubHandle,
        events: Arc<dyn ClientEventHandler>,
        deadlines: Deadlines,
        api_key: &str,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            hub,
            events,
            deadlines,
            api_key: if api_key.is_empty() {
                None
            } else {
                Some(api_key.to_string())
            },
            uptime: Instant::now(),
            shutdown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstructRequest {
    instruction: String,
    #[serde(default)]
    bots: Option<Vec<Uuid>>,
}

/// Constant-time string comparison to prevent timing attacks on API token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. `Ok` if authorized or no key is configured.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Result<(), ApiError> {
    let Some(key) = api_key else {
        return Ok(());
    };

    let Some(header) = headers.get("authorization") else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing Authorization header"})),
        ));
    };

    let Ok(value) = header.to_str() else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid Authorization header"})),
        ));
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

/// Map pipeline errors onto HTTP statuses.
fn api_error(e: ChorusError) -> ApiError {
    let status = match &e {
        ChorusError::NotFound(_) => StatusCode::NOT_FOUND,
        ChorusError::UnknownBackend(_) | ChorusError::Config(_) => StatusCode::BAD_REQUEST,
        ChorusError::Generator(_) | ChorusError::Channel(_) => StatusCode::BAD_GATEWAY,
        ChorusError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("api: {e}");
    }
    (status, Json(json!({"error": e.to_string()})))
}

/// `GET /api/health`
async fn health(headers: HeaderMap, State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let stats = state.hub.stats().await.unwrap_or_default();
    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "web_clients": stats.clients,
    })))
}

/// `GET /api/bots`
async fn list_bots(headers: HeaderMap, State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let bots = state.gateway.list_bots().await.map_err(api_error)?;
    Ok(Json(json!(bots)))
}

/// `POST /api/bots`
async fn create_bot(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Json(req): Json<NewBot>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_auth(&headers, &state.api_key)?;
    let bot = state.gateway.create_bot(req).await.map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!(bot))))
}

/// `GET /api/bots/{id}`
async fn get_bot(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let bot = state.gateway.get_bot(id).await.map_err(api_error)?;
    Ok(Json(json!(bot)))
}

/// `DELETE /api/bots/{id}`
async fn delete_bot(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    check_auth(&headers, &state.api_key)?;
    state.gateway.delete_bot(id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/bots/{id}/avatar`, PNG bytes.
async fn bot_avatar(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let png = state.gateway.bot_avatar(id).await.map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// `GET /api/channels`
async fn list_channels(
    headers: HeaderMap,
    State(state): State<ApiState>,
) -> Result<Json<Value>, ApiError> {
    check_auth(&headers, &state.api_key)?;
    let channels = state.gateway.list_channels().await.map_err(api_error)?;
    Ok(Json(json!(channels)))
}

/// `POST /api/channels/{channel_id}/bots/{bot_id}`
async fn add_bot(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path((channel_id, bot_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    check_auth(&headers, &state.api_key)?;
    state
        .gateway
        .add_bot_to_channel(channel_id, bot_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/channels/{channel_id}/bots/{bot_id}`
async fn remove_bot(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path((channel_id, bot_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    check_auth(&headers, &state.api_key)?;
    state
        .gateway
        .remove_bot_from_channel(channel_id, bot_id)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/channels/{channel_id}/instruct`: accepted, generation is async.
async fn instruct(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<InstructRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_auth(&headers, &state.api_key)?;
    if req.instruction.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "instruction must not be empty"})),
        ));
    }
    let tasks = state
        .gateway
        .instruct(channel_id, &req.instruction, req.bots.as_deref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(json!({"tasks": tasks}))))
}

/// `GET /ws/{user_id}`: live web-client connection.
async fn websocket(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<ApiState>,
) -> Response {
    let ApiState {
        hub,
        events,
        deadlines,
        shutdown,
        ..
    } = state;
    let limit = deadlines.socket_limit();
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| web::serve(socket, user_id, hub, events, deadlines, shutdown))
}

/// Build the axum router with shared state.
fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/bots", get(list_bots).post(create_bot))
        .route("/api/bots/{id}", get(get_bot).delete(delete_bot))
        .route("/api/bots/{id}/avatar", get(bot_avatar))
        .route("/api/channels", get(list_channels))
        .route(
            "/api/channels/{channel_id}/bots/{bot_id}",
            post(add_bot).delete(remove_bot),
        )
        .route("/api/channels/{channel_id}/instruct", post(instruct))
        .route("/ws/{user_id}", get(websocket))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Start the API server and run it until `state`'s shutdown token fires.
pub async fn serve(config: ApiConfig, state: ApiState) {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        error!("API server error: {e}");
    }
}
