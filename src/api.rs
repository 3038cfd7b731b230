//! REST API Server for the barista agent
//!
//! Exposes the orchestrator via HTTP endpoints for the ordering frontend.
//! Every route except `/health` requires `Authorization: Bearer <token>`.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::Orchestrator;
use crate::auth::{authenticate, IdentityVerifier};
use crate::error::OrchestrationError;
use crate::media::MAX_MEDIA_BYTES;
use crate::models::{
    Caller, ChatMessage, ChatResponse, ErrorResponse, OrderConfirmation, TextResponse,
};

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn error_response(error: OrchestrationError) -> ApiError {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        warn!(status = status.as_u16(), "Request failed: {}", error);
    } else {
        info!(status = status.as_u16(), "Request rejected: {}", error);
    }

    (
        status,
        Json(ErrorResponse {
            text: error.public_message(),
            status_code: status.as_u16(),
        }),
    )
}

fn body_error(rejection: JsonRejection) -> ApiError {
    error_response(OrchestrationError::ValidationError(rejection.body_text()))
}

async fn caller(state: &ApiState, headers: &HeaderMap) -> std::result::Result<Caller, ApiError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    authenticate(state.verifier.as_ref(), header)
        .await
        .map_err(error_response)
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Conversation Endpoints
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: std::result::Result<Json<ChatMessage>, JsonRejection>,
) -> ApiResult<ChatResponse> {
    let caller = caller(&state, &headers).await?;
    let Json(message) = body.map_err(body_error)?;

    state
        .orchestrator
        .chat(&caller, message)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn approve_order_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: std::result::Result<Json<OrderConfirmation>, JsonRejection>,
) -> ApiResult<ChatResponse> {
    let caller = caller(&state, &headers).await?;
    let Json(confirmation) = body.map_err(body_error)?;

    state
        .orchestrator
        .approve_order(&caller, confirmation.order_approved)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn clear_session_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<TextResponse> {
    let caller = caller(&state, &headers).await?;

    state
        .orchestrator
        .clear_session(&caller)
        .await
        .map_err(error_response)?;

    Ok(Json(TextResponse {
        text: "Session invalidated.".to_string(),
    }))
}

/// =============================
/// Router
/// =============================

/// Largest accepted request body: a base64 image at the media limit plus
/// room for the rest of the JSON.
pub const MAX_REQUEST_BYTES: usize = MAX_MEDIA_BYTES.div_ceil(3) * 4 + 64 * 1024;

pub fn create_router(
    orchestrator: Arc<Orchestrator>,
    verifier: Arc<dyn IdentityVerifier>,
) -> Router {
    let state = ApiState {
        orchestrator,
        verifier,
    };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .route("/approveOrder", post(approve_order_handler))
        .route("/clearSession", post(clear_session_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    verifier: Arc<dyn IdentityVerifier>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator, verifier);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
