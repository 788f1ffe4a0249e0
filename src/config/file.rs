//! TOML configuration file loading
//!
//! Supports `~/.config/deck-narrator/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NarratorConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Upstash vector/redis endpoints
    #[serde(default)]
    pub upstash: UpstashFileConfig,

    /// Presentation timing
    #[serde(default)]
    pub presenter: PresenterFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory with the built web client
    pub static_dir: Option<String>,

    /// Directory holding `<language>/` slide image folders
    pub slides_dir: Option<String>,

    /// Global request budget per minute
    pub rate_limit: Option<u32>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Model identifier (e.g. "claude-sonnet-4-5")
    pub model: Option<String>,

    /// Max tokens for chat answers
    pub max_tokens: Option<u32>,

    /// Max tokens for streamed voice answers
    pub clm_max_tokens: Option<u32>,

    /// Number of prior turns forwarded to the model
    pub history_window: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// "elevenlabs" or "hume"
    pub tts_provider: Option<String>,

    /// ElevenLabs voice id
    pub elevenlabs_voice_id: Option<String>,

    /// ElevenLabs model id
    pub elevenlabs_model: Option<String>,

    /// Hume Octave voice name
    pub hume_voice_name: Option<String>,

    /// Deepgram model (e.g. "nova-2")
    pub stt_model: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub anthropic: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
    pub hume: Option<String>,
    pub hume_secret: Option<String>,
    pub hume_clm_secret: Option<String>,
}

/// Upstash configuration
#[derive(Debug, Default, Deserialize)]
pub struct UpstashFileConfig {
    pub redis_url: Option<String>,
    pub redis_token: Option<String>,
    pub vector_url: Option<String>,
    pub vector_token: Option<String>,

    /// Expiry applied to stored conversation history
    pub history_ttl_secs: Option<u64>,
}

/// Presentation timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct PresenterFileConfig {
    pub wake_word: Option<String>,
    pub silence_timeout_ms: Option<u64>,
    pub advance_delay_ms: Option<u64>,
    pub narration_timeout_ms: Option<u64>,
    pub answer_timeout_ms: Option<u64>,
}

/// Load the TOML config file from `NARRATOR_CONFIG` or the standard path
///
/// Returns `NarratorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NarratorConfigFile {
    let Some(path) = std::env::var("NARRATOR_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path)
    else {
        return NarratorConfigFile::default();
    };

    if !path.exists() {
        return NarratorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                NarratorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            NarratorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/deck-narrator/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("deck-narrator").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let fc: NarratorConfigFile = toml::from_str(
            r#"
[server]
port = 4000

[presenter]
wake_word = "deck"
silence_timeout_ms = 1500
"#,
        )
        .unwrap();

        assert_eq!(fc.server.port, Some(4000));
        assert_eq!(fc.presenter.wake_word.as_deref(), Some("deck"));
        assert!(fc.llm.model.is_none());
    }
}
