use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use tracing::info;

use crate::models::chat::{ChatRequest, ChatResponse, EndSessionResponse, SessionResponse};
use crate::services::{ChatService, MetricsService, SessionService};
use crate::utils::error::ApiError;

const MAX_MESSAGE_LENGTH: usize = 1000;

pub async fn start_session(
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(metrics): Extension<Arc<MetricsService>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = sessions.create().await?;
    metrics.increment_active_sessions().await?;

    info!("Started chat session {}", session_id);

    Ok(Json(SessionResponse {
        session_id,
        status: "active".to_string(),
        message: "Chat session started successfully".to_string(),
    }))
}

pub async fn send_message(
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(chat): Extension<Arc<ChatService>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    if request.message.len() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "message exceeds {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    if !sessions.exists(&request.session_id).await? {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }

    let answer = chat
        .process_message(&request.session_id, &request.message)
        .await?;

    Ok(Json(ChatResponse {
        answer,
        session_id: request.session_id,
        timestamp: Utc::now(),
    }))
}

pub async fn end_session(
    Path(session_id): Path<String>,
    Extension(sessions): Extension<Arc<SessionService>>,
    Extension(metrics): Extension<Arc<MetricsService>>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    if !sessions.delete(&session_id).await? {
        return Err(ApiError::NotFound("Session not found".to_string()));
    }
    metrics.decrement_active_sessions().await?;

    info!("Ended chat session {}", session_id);

    Ok(Json(EndSessionResponse {
        message: format!("Session {session_id} ended successfully"),
    }))
}
