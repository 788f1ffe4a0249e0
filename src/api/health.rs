//! Health check endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use super::ApiState;
use crate::narration::Language;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    pub narrations: CheckResult,
    pub answers: CheckResult,
    pub speech: CheckResult,
    pub transcription: CheckResult,
    pub retrieval: CheckResult,
}

/// Result of a single check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }

    fn unavailable() -> Self {
        Self {
            status: "unavailable",
            message: Some("not configured".to_string()),
        }
    }

    fn from_configured(configured: bool) -> Self {
        if configured { Self::ok() } else { Self::unavailable() }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness probe
///
/// Narrations and an answer model are required; the voice and retrieval
/// services are optional and only reported.
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let checks = ReadinessChecks {
        narrations: check_narrations(&state),
        answers: CheckResult::from_configured(state.pipeline.has_generator()),
        speech: CheckResult::from_configured(state.pipeline.speech().is_some()),
        transcription: CheckResult::from_configured(state.deepgram_key.is_some()),
        retrieval: CheckResult::from_configured(state.retriever.is_some()),
    };

    let all_ok = checks.narrations.is_ok() && checks.answers.is_ok();
    let (status, http_status) = if all_ok {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (http_status, Json(ReadinessResponse { status, checks }))
}

fn check_narrations(state: &ApiState) -> CheckResult {
    let narrations = state.pipeline.narrations();
    for language in Language::ALL {
        match narrations.deck(language) {
            Ok(deck) if !deck.is_empty() => {}
            Ok(_) => return CheckResult::fail(format!("{language} deck is empty")),
            Err(e) => return CheckResult::fail(e.to_string()),
        }
    }
    CheckResult::ok()
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build readiness router
pub fn ready_router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ready", get(ready)).with_state(state)
}
