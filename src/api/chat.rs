//! Typed chat endpoint

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::chat::{ChatInput, DEFAULT_SESSION};
use crate::narration::Language;

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .with_state(state)
}

/// Chat request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub current_slide: i64,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub text_only: bool,
    #[serde(default)]
    pub is_question: bool,
}

/// Chat response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub next_slide: usize,
    pub audio_url: String,
}

async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ChatError> {
    let language = match request.language.as_deref() {
        None | Some("") => Language::default(),
        Some(tag) => tag
            .parse::<Language>()
            .map_err(|e| ChatError::BadRequest(e.to_string()))?,
    };

    let session_id = request
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());

    let input = ChatInput {
        message: request.message,
        language,
        current_slide: request.current_slide,
        session_id,
        text_only: request.text_only,
        is_question: request.is_question,
    };

    let reply = state.pipeline.handle(input).await.map_err(|e| {
        tracing::error!(error = %e, %language, "chat request failed");
        ChatError::Failed(e.to_string())
    })?;

    Ok(Json(ChatResponse {
        message: reply.message,
        next_slide: reply.next_slide,
        audio_url: reply.audio.into_string(),
    }))
}

/// Chat API errors
#[derive(Debug)]
pub enum ChatError {
    BadRequest(String),
    Failed(String),
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            details: String,
        }

        let (status, error, details) = match self {
            Self::BadRequest(details) => (StatusCode::BAD_REQUEST, "Invalid request", details),
            Self::Failed(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process message",
                details,
            ),
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}
