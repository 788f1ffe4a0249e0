//! Anthropic Messages API client

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::sse::SseParser;
use crate::session::{ConversationTurn, Role};
use crate::{Error, Result};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Incremental text produced by a streamed completion
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A chat-style language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a conversation in one call
    async fn complete(
        &self,
        system: &str,
        messages: &[ConversationTurn],
        max_tokens: u32,
    ) -> Result<String>;

    /// Stream a completion as text deltas
    async fn stream(
        &self,
        system: &str,
        messages: &[ConversationTurn],
        max_tokens: u32,
    ) -> Result<TextStream>;

    /// Model identifier reported to callers
    fn model(&self) -> &str;
}

/// Anthropic message request
#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Anthropic message response
#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    text: Option<String>,
}

/// Streaming event payload (only the parts we read)
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

/// Claude over the Messages API
pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl AnthropicClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Anthropic API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    async fn send(&self, request: &MessageRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Anthropic request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Anthropic API error");
            return Err(Error::Llm(format!("API error {status}: {body}")));
        }

        Ok(response)
    }
}

fn to_messages(turns: &[ConversationTurn]) -> Vec<Message<'_>> {
    turns
        .iter()
        .map(|turn| Message {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &turn.content,
        })
        .collect()
}

/// Text carried by one streaming event, if any
fn delta_text(data: &str) -> Result<Option<String>> {
    let event: StreamEvent = serde_json::from_str(data)?;
    match event.kind.as_str() {
        "content_block_delta" => Ok(event
            .delta
            .filter(|d| d.kind == "text_delta")
            .and_then(|d| d.text)),
        "error" => Err(Error::Llm(
            event.error.map(|e| e.message).unwrap_or_default(),
        )),
        _ => Ok(None),
    }
}

/// Turn a raw SSE byte stream into text deltas
fn text_deltas<S, B>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        futures::pin_mut!(bytes);
        let mut parser = SseParser::new();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for event in parser.push(chunk.as_ref()) {
                if let Some(text) = delta_text(&event.data)? {
                    yield text;
                }
            }
        }
        if let Some(event) = parser.finish() {
            if let Some(text) = delta_text(&event.data)? {
                yield text;
            }
        }
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn complete(
        &self,
        system: &str,
        messages: &[ConversationTurn],
        max_tokens: u32,
    ) -> Result<String> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: to_messages(messages),
            stream: false,
        };

        tracing::debug!(model = %self.model, turns = messages.len(), "calling Anthropic");
        let result: MessageResponse = self.send(&request).await?.json().await?;

        let text = result
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(Error::Llm("empty response from model".to_string()));
        }
        Ok(text)
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[ConversationTurn],
        max_tokens: u32,
    ) -> Result<TextStream> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: to_messages(messages),
            stream: true,
        };

        let response = self.send(&request).await?;
        tracing::debug!(model = %self.model, "Anthropic stream starting");

        Ok(Box::pin(text_deltas(response.bytes_stream())))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
