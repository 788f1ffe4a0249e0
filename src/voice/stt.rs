//! Speech-to-text (STT) processing
//!
//! Deepgram is used in two ways: a live WebSocket stream that turns relayed
//! microphone audio into interim/final transcript events, and the
//! prerecorded endpoint for one-shot transcription of a finished clip.

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use url::Url;

use crate::narration::Language;
use crate::{Error, Result};

/// Live transcription endpoint
const LIVE_URL: &str = "wss://api.deepgram.com/v1/listen";

/// One-shot transcription endpoint
const PRERECORDED_URL: &str = "https://api.deepgram.com/v1/listen";

/// Buffered audio chunks waiting to be relayed upstream
const AUDIO_BUFFER: usize = 64;

/// Event produced by the live transcription stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// A transcript fragment, interim or final
    Transcript { text: String, is_final: bool },
    /// The provider detected the end of an utterance
    UtteranceEnd,
}

/// Parameters for a live transcription session
#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub model: String,
    pub language: Language,
    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
}

impl LiveOptions {
    #[must_use]
    pub fn new(model: impl Into<String>, language: Language) -> Self {
        Self {
            model: model.into(),
            language,
            utterance_end_ms: 1500,
            endpointing_ms: 300,
        }
    }

    /// Streaming URL with query parameters
    ///
    /// # Errors
    ///
    /// Returns error if the base URL cannot be parsed
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(LIVE_URL)?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", self.language.code())
            .append_pair("smart_format", "true")
            .append_pair("interim_results", "true")
            .append_pair("utterance_end_ms", &self.utterance_end_ms.to_string())
            .append_pair("vad_events", "true")
            .append_pair("endpointing", &self.endpointing_ms.to_string());
        Ok(url)
    }
}

/// Open live transcription socket
///
/// Audio pushed through [`LiveTranscription::audio_sender`] is forwarded to
/// Deepgram; transcript events arrive on [`LiveTranscription::next_event`].
/// Dropping or closing the value releases the socket.
pub struct LiveTranscription {
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    events: mpsc::Receiver<TranscriptEvent>,
    send_handle: JoinHandle<()>,
    recv_handle: JoinHandle<()>,
}

impl LiveTranscription {
    /// Connect to Deepgram and start the relay tasks
    ///
    /// # Errors
    ///
    /// Returns error if the handshake fails
    pub async fn connect(api_key: &SecretString, options: &LiveOptions) -> Result<Self> {
        let mut request = options.url()?.as_str().into_client_request()?;
        let auth = format!("Token {}", api_key.expose_secret())
            .parse()
            .map_err(|_| Error::Stt("invalid Deepgram API key".to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!(model = %options.model, language = %options.language, "Deepgram stream connected");

        let (mut write, mut read) = ws_stream.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_BUFFER);
        let (event_tx, events) = mpsc::channel(AUDIO_BUFFER);

        let send_handle = tokio::spawn(async move {
            while let Some(chunk) = audio_rx.recv().await {
                if let Err(e) = write.send(Message::Binary(chunk)).await {
                    tracing::warn!(error = %e, "failed to relay audio to Deepgram");
                    return;
                }
            }
            // Sender dropped: ask Deepgram to flush and close
            let close = r#"{"type":"CloseStream"}"#.to_string();
            if let Err(e) = write.send(Message::Text(close)).await {
                tracing::debug!(error = %e, "failed to send CloseStream");
            }
        });

        let recv_handle = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "Deepgram stream error");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => {
                        if let Some(event) = parse_live_message(&text)
                            && event_tx.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Message::Close(reason) => {
                        tracing::debug!(?reason, "Deepgram stream closed");
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            audio_tx: Some(audio_tx),
            events,
            send_handle,
            recv_handle,
        })
    }

    /// Channel for raw microphone audio
    ///
    /// Returns `None` once the stream has been closed.
    #[must_use]
    pub fn audio_sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.audio_tx.clone()
    }

    /// Next transcript event, or `None` when the stream has ended
    pub async fn next_event(&mut self) -> Option<TranscriptEvent> {
        self.events.recv().await
    }

    /// Flush pending audio and close the socket
    pub async fn close(mut self) {
        self.audio_tx = None;
        let grace = std::time::Duration::from_secs(2);
        if tokio::time::timeout(grace, &mut self.send_handle).await.is_err() {
            tracing::debug!("Deepgram send task did not finish in time");
        }
        self.recv_handle.abort();
    }
}

impl Drop for LiveTranscription {
    fn drop(&mut self) {
        self.send_handle.abort();
        self.recv_handle.abort();
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum LiveMessage {
    Results {
        channel: DeepgramChannel,
        #[serde(default)]
        is_final: bool,
    },
    UtteranceEnd,
    #[serde(other)]
    Other,
}

/// Translate one Deepgram live message into a transcript event
///
/// Metadata, speech-started and empty transcripts produce nothing.
#[must_use]
pub fn parse_live_message(text: &str) -> Option<TranscriptEvent> {
    let message: LiveMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::trace!(error = %e, "ignoring unparseable Deepgram message");
            return None;
        }
    };

    match message {
        LiveMessage::Results { channel, is_final } => {
            let transcript = channel
                .alternatives
                .into_iter()
                .next()
                .map(|a| a.transcript)
                .unwrap_or_default();
            if transcript.trim().is_empty() {
                return None;
            }
            tracing::debug!(transcript = %transcript, is_final, "heard");
            Some(TranscriptEvent::Transcript {
                text: transcript,
                is_final,
            })
        }
        LiveMessage::UtteranceEnd => Some(TranscriptEvent::UtteranceEnd),
        LiveMessage::Other => None,
    }
}

/// Response from Deepgram prerecorded transcription API
#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes finished audio clips
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl SpeechToText {
    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        })
    }

    /// Transcribe an encoded audio clip
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8], mime: &str, language: Language) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let mut url = Url::parse(PRERECORDED_URL)?;
        url.query_pairs_mut()
            .append_pair("model", &self.model)
            .append_pair("language", language.code())
            .append_pair("punctuate", "true");

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", mime)
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default();

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let msg = r#"{"type":"Results","is_final":true,"channel":{"alternatives":[{"transcript":"novo what is the market","confidence":0.9}]}}"#;
        assert_eq!(
            parse_live_message(msg),
            Some(TranscriptEvent::Transcript {
                text: "novo what is the market".to_string(),
                is_final: true,
            })
        );
    }

    #[test]
    fn test_parse_interim_defaults_to_not_final() {
        let msg = r#"{"type":"Results","channel":{"alternatives":[{"transcript":"novo"}]}}"#;
        assert!(matches!(
            parse_live_message(msg),
            Some(TranscriptEvent::Transcript { is_final: false, .. })
        ));
    }

    #[test]
    fn test_parse_skips_noise() {
        assert_eq!(
            parse_live_message(r#"{"type":"Results","channel":{"alternatives":[{"transcript":"  "}]}}"#),
            None
        );
        assert_eq!(parse_live_message(r#"{"type":"Metadata","request_id":"x"}"#), None);
        assert_eq!(parse_live_message(r#"{"type":"SpeechStarted"}"#), None);
        assert_eq!(parse_live_message("not json"), None);
        assert_eq!(
            parse_live_message(r#"{"type":"UtteranceEnd","last_word_end":2.1}"#),
            Some(TranscriptEvent::UtteranceEnd)
        );
    }

    #[test]
    fn test_live_url() {
        let url = LiveOptions::new("nova-2", Language::Pt).url().unwrap();
        let url = url.as_str();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?model=nova-2&language=pt"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("utterance_end_ms=1500"));
        assert!(url.contains("vad_events=true"));
        assert!(url.contains("endpointing=300"));
    }
}
