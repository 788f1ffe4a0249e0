//! Custom language model endpoint for Hume EVI
//!
//! Hume posts the running voice conversation here and expects an
//! OpenAI-compatible `chat.completion.chunk` SSE stream back. Prosody scores
//! attached to the visitor's last message are folded into the system prompt.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use chrono::Utc;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::answer::prompt::{clm_system_prompt, emotion_summary};
use crate::narration::Language;
use crate::retrieval::context_block;
use crate::session::ConversationTurn;

/// Fingerprint reported when Hume sends no session id
const DEFAULT_FINGERPRINT: &str = "novo-clm";

/// Build CLM router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/hume-clm", post(hume_clm))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ClmQuery {
    #[serde(default)]
    pub custom_session_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Conversation as posted by Hume
#[derive(Debug, Default, Deserialize)]
pub struct ClmRequest {
    #[serde(default)]
    pub messages: Vec<ClmMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ClmMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub models: Option<ClmModels>,
}

#[derive(Debug, Deserialize)]
pub struct ClmModels {
    #[serde(default)]
    pub prosody: Option<Prosody>,
}

#[derive(Debug, Deserialize)]
pub struct Prosody {
    #[serde(default)]
    pub scores: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct CompletionChunk<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    system_fingerprint: &'a str,
    choices: [ChunkChoice; 1],
}

#[derive(Debug, Serialize)]
struct ChunkChoice {
    index: u32,
    delta: Delta,
    finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

/// Whether the `Authorization` header carries an acceptable bearer token
///
/// With a configured secret the token must match it exactly; otherwise any
/// non-empty bearer token is accepted.
pub fn is_authorized(headers: &HeaderMap, secret: Option<&SecretString>) -> bool {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
    else {
        return false;
    };

    match secret {
        Some(secret) => token == secret.expose_secret(),
        None => !token.is_empty(),
    }
}

/// Text and prosody scores of the visitor's last message
fn latest_user_message(messages: &[ClmMessage]) -> (String, Vec<(String, f64)>) {
    let Some(last) = messages.iter().rev().find(|m| m.role == "user") else {
        return (String::new(), Vec::new());
    };

    let text = last.content.clone().unwrap_or_default();
    let scores = last
        .models
        .as_ref()
        .and_then(|m| m.prosody.as_ref())
        .map(|p| p.scores.iter().map(|(k, v)| (k.clone(), *v)).collect())
        .unwrap_or_default();
    (text, scores)
}

/// User and assistant turns, in order
fn conversation(messages: &[ClmMessage]) -> Vec<ConversationTurn> {
    messages
        .iter()
        .filter_map(|m| {
            let content = m.content.clone().unwrap_or_default();
            match m.role.as_str() {
                "user" => Some(ConversationTurn::user(content)),
                "assistant" => Some(ConversationTurn::assistant(content)),
                _ => None,
            }
        })
        .collect()
}

fn chunk_event(
    id: &str,
    created: i64,
    model: &str,
    fingerprint: &str,
    content: Option<String>,
    finish_reason: Option<&'static str>,
) -> Option<Event> {
    let chunk = CompletionChunk {
        id,
        object: "chat.completion.chunk",
        created,
        model,
        system_fingerprint: fingerprint,
        choices: [ChunkChoice {
            index: 0,
            delta: Delta { content },
            finish_reason,
        }],
    };
    serde_json::to_string(&chunk)
        .ok()
        .map(|json| Event::default().data(json))
}

async fn hume_clm(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ClmQuery>,
    headers: HeaderMap,
    Json(request): Json<ClmRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ClmError> {
    if !is_authorized(&headers, state.hume_clm_secret.as_ref()) {
        return Err(ClmError::Unauthorized);
    }

    let llm = state
        .llm
        .clone()
        .ok_or_else(|| ClmError::Internal("ANTHROPIC_API_KEY not set".to_string()))?;

    let language = query
        .language
        .as_deref()
        .and_then(|l| l.parse::<Language>().ok())
        .unwrap_or_default();
    let fingerprint = query
        .custom_session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_FINGERPRINT.to_string());

    tracing::info!(messages = request.messages.len(), %language, "voice CLM request");

    let (question, scores) = latest_user_message(&request.messages);
    let passages = match &state.retriever {
        Some(retriever) if !question.trim().is_empty() => {
            retriever.retrieve(&question, language).await
        }
        _ => Vec::new(),
    };

    let system = clm_system_prompt(
        Utc::now(),
        &emotion_summary(&scores),
        &context_block(&passages),
    );
    let turns = conversation(&request.messages);

    let mut deltas = llm
        .stream(&system, &turns, state.clm_max_tokens)
        .await
        .map_err(|e| ClmError::Internal(e.to_string()))?;

    let model = llm.model().to_string();
    let created = Utc::now().timestamp();

    let sse_stream = async_stream::stream! {
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(text) => {
                    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
                    if let Some(event) = chunk_event(&id, created, &model, &fingerprint, Some(text), None) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "voice CLM stream failed");
                    let err = serde_json::json!({
                        "error": {"message": e.to_string(), "type": "server_error"}
                    });
                    yield Ok(Event::default().data(err.to_string()));
                    return;
                }
            }
        }

        let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        if let Some(event) = chunk_event(&id, created, &model, &fingerprint, None, Some("stop")) {
            yield Ok(event);
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// CLM endpoint errors
#[derive(Debug)]
pub enum ClmError {
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ClmError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "voice CLM request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_any_bearer_without_secret() {
        assert!(is_authorized(&bearer("abc"), None));
        assert!(!is_authorized(&bearer(""), None));
        assert!(!is_authorized(&HeaderMap::new(), None));
    }

    #[test]
    fn test_secret_must_match() {
        let secret = SecretString::from("s3cret");
        assert!(is_authorized(&bearer("s3cret"), Some(&secret)));
        assert!(!is_authorized(&bearer("other"), Some(&secret)));
    }

    #[test]
    fn test_latest_user_message_and_scores() {
        let request: ClmRequest = serde_json::from_value(serde_json::json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": "How big is the market?",
                 "models": {"prosody": {"scores": {"Interest": 0.8, "Calmness": 0.4}}}},
                {"role": "system", "content": "ignored"}
            ]
        }))
        .unwrap();

        let (text, scores) = latest_user_message(&request.messages);
        assert_eq!(text, "How big is the market?");
        assert_eq!(scores.len(), 2);
        assert_eq!(conversation(&request.messages).len(), 3);
    }

    #[test]
    fn test_chunk_shape() {
        let chunk = CompletionChunk {
            id: "chatcmpl-1",
            object: "chat.completion.chunk",
            created: 0,
            model: "m",
            system_fingerprint: DEFAULT_FINGERPRINT,
            choices: [ChunkChoice {
                index: 0,
                delta: Delta { content: None },
                finish_reason: Some("stop"),
            }],
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["delta"], serde_json::json!({}));
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["system_fingerprint"], "novo-clm");
    }
}
