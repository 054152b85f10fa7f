//! HTTP surface: REST session control plus the WebSocket terminal endpoint.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use termgate_core::Credentials;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::relay;
use crate::session::{ConnectOptions, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub connect_options: ConnectOptions,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/connect", post(connect))
        .route("/api/disconnect/{id}", post(disconnect))
        .route("/api/resize/{id}", post(resize))
        .route("/ws/terminal/{id}", get(terminal_ws))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": "termgate"}))
}

/// Open a new SSH session. Failures are reported in-band with 200 and
/// `success: false` so browser clients see the message without special
/// error handling.
async fn connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Json<ConnectResponse> {
    let credentials = match Credentials::from_parts(
        request.host,
        request.port,
        request.username,
        request.password,
        request.private_key,
        request.passphrase,
    ) {
        Ok(credentials) => credentials,
        Err(e) => {
            return Json(ConnectResponse {
                success: false,
                message: e.to_string(),
                session_id: None,
            });
        }
    };

    let id = Uuid::new_v4().to_string();
    let session = state.registry.create(&id).await;
    match session.connect(&credentials, &state.connect_options).await {
        Ok(message) => {
            info!(session_id = %id, remote = %credentials.remote(), "connect accepted");
            Json(ConnectResponse {
                success: true,
                message,
                session_id: Some(id),
            })
        }
        Err(e) => {
            warn!(session_id = %id, error = %e, "connect failed");
            state.registry.remove(&id).await;
            Json(ConnectResponse {
                success: false,
                message: e.to_string(),
                session_id: None,
            })
        }
    }
}

async fn disconnect(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.registry.get(&id).await.is_none() {
        return not_found();
    }
    state.registry.remove(&id).await;
    Json(json!({"success": true, "message": "Disconnected"})).into_response()
}

async fn resize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResizeRequest>,
) -> Response {
    let session = match state.registry.get(&id).await {
        Some(session) => session,
        None => return not_found(),
    };
    let success = session.resize(request.cols, request.rows).await;
    Json(json!({"success": success})).into_response()
}

async fn terminal_ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = state.registry.get(&id).await;
    ws.on_upgrade(move |socket| relay::run(socket, session))
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"detail": "Session not found"})),
    )
        .into_response()
}
