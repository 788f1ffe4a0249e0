//! Configuration management for the deck narrator
//!
//! Precedence for every value: environment variable, then the TOML config
//! file, then the built-in default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::Result;
use file::NarratorConfigFile;

/// Default Anthropic model for answers
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Deck narrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Speech synthesis / transcription configuration
    pub voice: VoiceConfig,

    /// Language model configuration
    pub llm: LlmConfig,

    /// Upstash vector and redis endpoints
    pub upstash: UpstashConfig,

    /// Presentation controller timing
    pub presenter: PresenterConfig,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,

    /// Directory with one sub-directory of slide images per language
    pub slides_dir: PathBuf,

    /// Requests per minute allowed across the whole API, if limited
    pub rate_limit: Option<u32>,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `Anthropic` API key (answers and voice CLM)
    pub anthropic: Option<SecretString>,

    /// `ElevenLabs` API key (TTS)
    pub elevenlabs: Option<SecretString>,

    /// `Deepgram` API key (live STT)
    pub deepgram: Option<SecretString>,

    /// Hume API key (Octave TTS and EVI tokens)
    pub hume: Option<SecretString>,

    /// Hume secret key (EVI token exchange)
    pub hume_secret: Option<SecretString>,

    /// Shared secret expected from Hume on the CLM endpoint
    pub hume_clm_secret: Option<SecretString>,
}

/// Which hosted TTS provider narrates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TtsProviderKind {
    #[default]
    ElevenLabs,
    Hume,
}

impl TtsProviderKind {
    /// Parse a provider name, defaulting to `ElevenLabs`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("hume") {
            Self::Hume
        } else {
            Self::ElevenLabs
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// TTS provider
    pub tts_provider: TtsProviderKind,

    /// `ElevenLabs` voice identifier
    pub elevenlabs_voice_id: String,

    /// `ElevenLabs` model identifier
    pub elevenlabs_model: String,

    /// Hume Octave voice name
    pub hume_voice_name: String,

    /// Deepgram model for live transcription
    pub stt_model: String,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model identifier
    pub model: String,

    /// Max tokens for chat answers
    pub max_tokens: u32,

    /// Max tokens for streamed voice answers
    pub clm_max_tokens: u32,

    /// Most recent conversation turns forwarded with each question
    pub history_window: usize,
}

/// Upstash endpoints
#[derive(Debug, Clone, Default)]
pub struct UpstashConfig {
    pub redis_url: Option<String>,
    pub redis_token: Option<SecretString>,
    pub vector_url: Option<String>,
    pub vector_token: Option<SecretString>,

    /// Expiry for stored conversation history
    pub history_ttl: Option<Duration>,
}

/// Presentation controller timing and wake word
#[derive(Debug, Clone)]
pub struct PresenterConfig {
    /// Word that interrupts narration (matched case-insensitively)
    pub wake_word: String,

    /// Inactivity after the last transcript fragment that ends a question
    pub silence_timeout: Duration,

    /// Pause between one slide's narration ending and the next starting
    pub advance_delay: Duration,

    /// Upper bound on waiting for narration audio
    pub narration_timeout: Duration,

    /// Upper bound on waiting for an answer
    pub answer_timeout: Duration,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            wake_word: "novo".to_string(),
            silence_timeout: Duration::from_millis(2000),
            advance_delay: Duration::from_millis(1500),
            narration_timeout: Duration::from_secs(20),
            answer_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be assembled
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(|key| std::env::var(key).ok(), fc)
    }

    /// Assemble configuration from an environment lookup and a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be assembled
    pub fn from_sources<F>(env: F, fc: NarratorConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str, fallback: Option<String>| {
            env(key)
                .or(fallback)
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from)
        };
        let number = |key: &str| env(key).and_then(|s| s.parse::<u64>().ok());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            anthropic: secret("ANTHROPIC_API_KEY", fc.api_keys.anthropic),
            elevenlabs: secret("ELEVENLABS_API_KEY", fc.api_keys.elevenlabs),
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            hume: secret("HUME_API_KEY", fc.api_keys.hume),
            hume_secret: secret("HUME_SECRET_KEY", fc.api_keys.hume_secret),
            hume_clm_secret: secret("HUME_CLM_SECRET", fc.api_keys.hume_clm_secret),
        };

        // Server (env > toml > default)
        let server = ServerConfig {
            port: env("NARRATOR_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(3000),
            static_dir: env("NARRATOR_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
            slides_dir: env("NARRATOR_SLIDES_DIR")
                .or(fc.server.slides_dir)
                .map_or_else(|| PathBuf::from("public/slides"), PathBuf::from),
            rate_limit: env("NARRATOR_RATE_LIMIT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.rate_limit)
                .filter(|rpm| *rpm > 0),
        };

        let voice = VoiceConfig {
            tts_provider: env("TTS_PROVIDER")
                .or(fc.voice.tts_provider)
                .map(|p| TtsProviderKind::from_name(&p))
                .unwrap_or_default(),
            elevenlabs_voice_id: env("ELEVENLABS_VOICE_ID")
                .or(fc.voice.elevenlabs_voice_id)
                .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string()),
            elevenlabs_model: env("ELEVENLABS_MODEL")
                .or(fc.voice.elevenlabs_model)
                .unwrap_or_else(|| "eleven_multilingual_v2".to_string()),
            hume_voice_name: env("HUME_VOICE_NAME")
                .or(fc.voice.hume_voice_name)
                .unwrap_or_else(|| "KORA".to_string()),
            stt_model: env("DEEPGRAM_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "nova-2".to_string()),
        };

        let llm = LlmConfig {
            model: env("NARRATOR_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: fc.llm.max_tokens.unwrap_or(1024),
            clm_max_tokens: fc.llm.clm_max_tokens.unwrap_or(512),
            history_window: env("NARRATOR_HISTORY_WINDOW")
                .and_then(|s| s.parse().ok())
                .or(fc.llm.history_window)
                .unwrap_or(10),
        };

        let upstash = UpstashConfig {
            redis_url: env("UPSTASH_REDIS_REST_URL").or(fc.upstash.redis_url),
            redis_token: secret("UPSTASH_REDIS_REST_TOKEN", fc.upstash.redis_token),
            vector_url: env("UPSTASH_VECTOR_REST_URL").or(fc.upstash.vector_url),
            vector_token: secret("UPSTASH_VECTOR_REST_TOKEN", fc.upstash.vector_token),
            history_ttl: number("NARRATOR_HISTORY_TTL_SECS")
                .or(fc.upstash.history_ttl_secs)
                .map(Duration::from_secs),
        };

        let defaults = PresenterConfig::default();
        let millis = |key: &str, file_value: Option<u64>, default: Duration| {
            number(key)
                .or(file_value)
                .map_or(default, Duration::from_millis)
        };
        let presenter = PresenterConfig {
            wake_word: env("NARRATOR_WAKE_WORD")
                .or(fc.presenter.wake_word)
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .unwrap_or(defaults.wake_word),
            silence_timeout: millis(
                "NARRATOR_SILENCE_TIMEOUT_MS",
                fc.presenter.silence_timeout_ms,
                defaults.silence_timeout,
            ),
            advance_delay: millis(
                "NARRATOR_ADVANCE_DELAY_MS",
                fc.presenter.advance_delay_ms,
                defaults.advance_delay,
            ),
            narration_timeout: millis(
                "NARRATOR_NARRATION_TIMEOUT_MS",
                fc.presenter.narration_timeout_ms,
                defaults.narration_timeout,
            ),
            answer_timeout: millis(
                "NARRATOR_ANSWER_TIMEOUT_MS",
                fc.presenter.answer_timeout_ms,
                defaults.answer_timeout,
            ),
        };

        Ok(Self {
            server,
            api_keys,
            voice,
            llm,
            upstash,
            presenter,
        })
    }
}
