//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{TtsProviderKind, VoiceConfig};
use crate::narration::Language;
use crate::{Error, Result};

/// Playable audio handed to the browser, encoded as a `data:` URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(String);

impl AudioRef {
    /// Wrap MP3 bytes into a `data:audio/mpeg;base64,...` URL
    #[must_use]
    pub fn from_mp3(audio: &[u8]) -> Self {
        Self(format!("data:audio/mpeg;base64,{}", STANDARD.encode(audio)))
    }

    /// Wrap audio that is already base64 encoded
    #[must_use]
    pub fn from_base64_mp3(encoded: &str) -> Self {
        Self(format!("data:audio/mpeg;base64,{encoded}"))
    }

    /// Wrap an arbitrary URL
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The "no audio" reference
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

/// Something that can turn text into playable audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` spoken in `language`
    async fn synthesize(&self, text: &str, language: Language) -> Result<AudioRef>;
}

/// Synthesizes speech via a hosted provider
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    model: String,
    description: Option<String>,
    provider: TtsProviderKind,
}

impl TextToSpeech {
    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            model,
            description: None,
            provider: TtsProviderKind::ElevenLabs,
        })
    }

    /// Create a new TTS instance using Hume Octave
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_hume(api_key: SecretString, voice_name: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Hume API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_name,
            model: "octave".to_string(),
            description: None,
            provider: TtsProviderKind::Hume,
        })
    }

    /// Build the configured provider from voice settings and keys
    ///
    /// # Errors
    ///
    /// Returns error if the selected provider has no API key
    pub fn from_config(
        voice: &VoiceConfig,
        elevenlabs_key: Option<&SecretString>,
        hume_key: Option<&SecretString>,
    ) -> Result<Self> {
        match voice.tts_provider {
            TtsProviderKind::ElevenLabs => {
                let key = elevenlabs_key
                    .ok_or_else(|| Error::Config("ELEVENLABS_API_KEY not set".to_string()))?;
                Self::new_elevenlabs(
                    key.clone(),
                    voice.elevenlabs_voice_id.clone(),
                    voice.elevenlabs_model.clone(),
                )
            }
            TtsProviderKind::Hume => {
                let key =
                    hume_key.ok_or_else(|| Error::Config("HUME_API_KEY not set".to_string()))?;
                Self::new_hume(key.clone(), voice.hume_voice_name.clone())
            }
        }
    }

    /// Acting instructions passed to Hume Octave (ignored by `ElevenLabs`)
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProviderKind {
        self.provider
    }

    /// Synthesize text to speech
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize_text(&self, text: &str) -> Result<AudioRef> {
        match self.provider {
            TtsProviderKind::ElevenLabs => self.synthesize_elevenlabs(text).await,
            TtsProviderKind::Hume => self.synthesize_hume(text).await,
        }
    }

    /// Synthesize using `ElevenLabs` TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<AudioRef> {
        #[derive(Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
        }

        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        tracing::debug!(voice = %self.voice, chars = text.len(), "requesting ElevenLabs speech");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), "ElevenLabs audio generated");
        Ok(AudioRef::from_mp3(&audio))
    }

    /// Synthesize using Hume Octave TTS
    async fn synthesize_hume(&self, text: &str) -> Result<AudioRef> {
        #[derive(Serialize)]
        struct HumeVoice<'a> {
            name: &'a str,
        }

        #[derive(Serialize)]
        struct HumeUtterance<'a> {
            text: &'a str,
            voice: HumeVoice<'a>,
            #[serde(skip_serializing_if = "Option::is_none")]
            description: Option<&'a str>,
        }

        #[derive(Serialize)]
        struct HumeFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }

        #[derive(Serialize)]
        struct HumeRequest<'a> {
            utterances: Vec<HumeUtterance<'a>>,
            format: HumeFormat,
            num_generations: u8,
        }

        let request = HumeRequest {
            utterances: vec![HumeUtterance {
                text,
                voice: HumeVoice { name: &self.voice },
                description: self.description.as_deref(),
            }],
            format: HumeFormat { kind: "mp3" },
            num_generations: 1,
        };

        tracing::debug!(voice = %self.voice, chars = text.len(), "requesting Hume speech");

        let response = self
            .client
            .post("https://api.hume.ai/v0/tts")
            .header("X-Hume-Api-Key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Hume TTS error {status}: {body}")));
        }

        let body: HumeResponse = response.json().await?;
        audio_from_hume(body)
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str, language: Language) -> Result<AudioRef> {
        tracing::trace!(%language, "synthesizing");
        self.synthesize_text(text).await
    }
}

#[derive(Deserialize)]
struct HumeResponse {
    #[serde(default)]
    generations: Vec<HumeGeneration>,
}

#[derive(Deserialize)]
struct HumeGeneration {
    audio: String,
    #[serde(default)]
    duration: Option<f64>,
}

fn audio_from_hume(body: HumeResponse) -> Result<AudioRef> {
    let generation = body
        .generations
        .into_iter()
        .next()
        .ok_or_else(|| Error::Tts("Hume returned no generations".to_string()))?;

    tracing::debug!(duration = ?generation.duration, "Hume audio generated");
    Ok(AudioRef::from_base64_mp3(&generation.audio))
}
