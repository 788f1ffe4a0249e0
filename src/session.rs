//! Conversation history storage
//!
//! Each visitor session keeps an append-only list of turns under
//! `chat:{session_id}`. Store failures never reach the caller: reads degrade
//! to an empty history and writes are dropped with a warning.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{Error, Result};

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Storage key for a session's history
#[must_use]
pub fn history_key(session_id: &str) -> String {
    format!("chat:{session_id}")
}

/// The most recent `window` turns
#[must_use]
pub fn recent(turns: &[ConversationTurn], window: usize) -> &[ConversationTurn] {
    &turns[turns.len().saturating_sub(window)..]
}

/// Persistent conversation history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Full history for a session, oldest first
    async fn load(&self, session_id: &str) -> Vec<ConversationTurn>;

    /// Append turns to a session's history
    async fn append(&self, session_id: &str, turns: &[ConversationTurn]);

    /// Forget a session
    async fn clear(&self, session_id: &str);
}

/// In-process history, used when no Redis endpoint is configured
#[derive(Default)]
pub struct MemoryHistory {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl MemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn load(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, session_id: &str, turns: &[ConversationTurn]) {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(turns);
    }

    async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

/// Upstash Redis over its REST command API
pub struct UpstashHistory {
    client: reqwest::Client,
    url: String,
    token: SecretString,
    ttl: Option<Duration>,
}

#[derive(Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashHistory {
    #[must_use]
    pub fn new(url: &str, token: SecretString, ttl: Option<Duration>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            token,
            ttl,
        }
    }

    async fn command(&self, args: &[String]) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(args)
            .send()
            .await?;

        let status = response.status();
        let body: CommandResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(Error::Session(format!("redis {status}: {error}")));
        }
        if !status.is_success() {
            return Err(Error::Session(format!("redis command failed {status}")));
        }
        Ok(body.result)
    }

    async fn get(&self, key: &str) -> Result<Vec<ConversationTurn>> {
        let value = self.command(&["GET".to_string(), key.to_string()]).await?;
        match value {
            serde_json::Value::String(raw) => Ok(serde_json::from_str(&raw)?),
            _ => Ok(Vec::new()),
        }
    }

    async fn set(&self, key: &str, turns: &[ConversationTurn]) -> Result<()> {
        let mut args = vec!["SET".to_string(), key.to_string(), serde_json::to_string(turns)?];
        if let Some(ttl) = self.ttl {
            args.push("EX".to_string());
            args.push(ttl.as_secs().max(1).to_string());
        }
        self.command(&args).await.map(|_| ())
    }
}

#[async_trait]
impl HistoryStore for UpstashHistory {
    async fn load(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.get(&history_key(session_id)).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, session_id, "failed to load history");
            Vec::new()
        })
    }

    async fn append(&self, session_id: &str, turns: &[ConversationTurn]) {
        let key = history_key(session_id);
        // Never write back a history that could not be read
        let mut history = match self.get(&key).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, session_id, "failed to read history, turns not saved");
                return;
            }
        };
        history.extend_from_slice(turns);

        if let Err(e) = self.set(&key, &history).await {
            tracing::warn!(error = %e, session_id, "failed to save history");
        }
    }

    async fn clear(&self, session_id: &str) {
        let args = ["DEL".to_string(), history_key(session_id)];
        if let Err(e) = self.command(&args).await {
            tracing::warn!(error = %e, session_id, "failed to clear history");
        }
    }
}
