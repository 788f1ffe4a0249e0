//! Short-lived credentials for the browser
//!
//! The browser talks to Deepgram and Hume directly; these endpoints trade the
//! server's long-lived keys for temporary tokens so the keys never leave the
//! server.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::ApiState;

const DEEPGRAM_GRANT_URL: &str = "https://api.deepgram.com/v1/auth/grant";
const HUME_TOKEN_URL: &str = "https://api.hume.ai/oauth2-cc/token";

/// Lifetime requested for Deepgram grants
const DEEPGRAM_TOKEN_TTL_SECS: u64 = 60;

/// Build token router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/deepgram-token", get(deepgram_token))
        .route("/api/hume-token", get(hume_token))
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepgramTokenResponse {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Deserialize)]
struct DeepgramGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

async fn deepgram_token(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<DeepgramTokenResponse>, TokenError> {
    let key = state
        .deepgram_key
        .as_ref()
        .ok_or(TokenError::NotConfigured("Deepgram API key not configured"))?;

    let response = state
        .http
        .post(DEEPGRAM_GRANT_URL)
        .header(header::AUTHORIZATION, format!("Token {}", key.expose_secret()))
        .json(&serde_json::json!({ "ttl_seconds": DEEPGRAM_TOKEN_TTL_SECS }))
        .send()
        .await
        .map_err(|e| TokenError::Upstream("Deepgram", e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(TokenError::Upstream("Deepgram", format!("{status}: {body}")));
    }

    let grant: DeepgramGrant = response
        .json()
        .await
        .map_err(|e| TokenError::Upstream("Deepgram", e.to_string()))?;

    Ok(Json(DeepgramTokenResponse {
        token: grant.access_token,
        expires_in: grant.expires_in.unwrap_or(DEEPGRAM_TOKEN_TTL_SECS),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HumeTokenResponse {
    pub access_token: String,
}

#[derive(Deserialize)]
struct HumeToken {
    access_token: String,
}

async fn hume_token(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<HumeTokenResponse>, TokenError> {
    let (Some(api_key), Some(secret_key)) = (&state.hume_key, &state.hume_secret) else {
        return Err(TokenError::NotConfigured("Hume API credentials not configured"));
    };

    let response = state
        .http
        .post(HUME_TOKEN_URL)
        .basic_auth(api_key.expose_secret(), Some(secret_key.expose_secret()))
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("grant_type=client_credentials")
        .send()
        .await
        .map_err(|e| TokenError::Upstream("Hume", e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(TokenError::Upstream("Hume", format!("{status}: {body}")));
    }

    let token: HumeToken = response
        .json()
        .await
        .map_err(|e| TokenError::Upstream("Hume", e.to_string()))?;

    if token.access_token.is_empty() {
        return Err(TokenError::Upstream("Hume", "empty access token".to_string()));
    }

    Ok(Json(HumeTokenResponse {
        access_token: token.access_token,
    }))
}

/// Token endpoint errors
#[derive(Debug)]
pub enum TokenError {
    NotConfigured(&'static str),
    Upstream(&'static str, String),
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let error = match self {
            Self::NotConfigured(msg) => {
                tracing::warn!(msg, "token requested but not configured");
                msg.to_string()
            }
            Self::Upstream(service, detail) => {
                tracing::error!(service, error = %detail, "token exchange failed");
                format!("Failed to get {service} access token")
            }
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error })).into_response()
    }
}
