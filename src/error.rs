//! Error types for the deck narrator

use thiserror::Error;

/// Result type alias for narrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the deck narrator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown or unsupported language tag
    #[error("unsupported language: {0}")]
    Language(String),

    /// Narration data error
    #[error("narration error: {0}")]
    Narration(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Vector retrieval error
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Session store error
    #[error("session store error: {0}")]
    Session(String),

    /// Language model error
    #[error("llm error: {0}")]
    Llm(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
