//! WebSocket that drives one narrated presentation
//!
//! Text frames carry JSON [`ClientMessage`]s in and [`ServerMessage`]s out.
//! Binary frames are raw microphone audio; the first one opens a Deepgram
//! live transcription whose results are fed back into the presentation.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::ApiState;
use crate::narration::Language;
use crate::presenter::runtime::{PresentationHandle, PresentationRuntime, RuntimeDeps, ServerMessage};
use crate::presenter::{Event, PresentationState};
use secrecy::SecretString;

use crate::voice::{LiveOptions, LiveTranscription, TranscriptEvent};

/// Outbound messages buffered per connection
const OUTBOUND_BUFFER: usize = 64;

/// Build presentation router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws/presentation", get(ws_upgrade))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresentationQuery {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Message from the browser client
///
/// Only these inputs are accepted from the client; timers and adapter
/// results are produced server-side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start,
    AudioEnded {
        playback: u64,
    },
    AudioProgress {
        playback: u64,
        position: f64,
        duration: f64,
    },
    /// Transcript from a client-side recognizer
    Transcript {
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    UtteranceEnd,
    Next,
    Goto {
        slide: i64,
    },
    SkipToEnd,
}

impl From<ClientMessage> for Event {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Start => Self::Start,
            ClientMessage::AudioEnded { playback } => Self::AudioEnded { playback },
            ClientMessage::AudioProgress {
                playback,
                position,
                duration,
            } => Self::AudioProgress {
                playback,
                position,
                duration,
            },
            ClientMessage::Transcript { text, is_final } => Self::Transcript { text, is_final },
            ClientMessage::UtteranceEnd => Self::UtteranceEnd,
            ClientMessage::Next => Self::Advance,
            ClientMessage::Goto { slide } => Self::Goto { slide },
            ClientMessage::SkipToEnd => Self::SkipToEnd,
        }
    }
}

async fn ws_upgrade(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PresentationQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

fn error_frame(message: &str) -> Message {
    let body = serde_json::json!({ "type": "error", "message": message });
    Message::Text(body.to_string().into())
}

/// Signal from the socket writer task to the connection loop
#[derive(Debug, PartialEq, Eq)]
enum WriterSignal {
    /// The presentation reached its end
    Finished,
    /// The outbound stream or the socket closed
    Closed,
}

/// Serialize server messages onto the socket until either side closes
async fn write_outbound<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<ServerMessage>,
    signals: mpsc::UnboundedSender<WriterSignal>,
) where
    S: Sink<Message> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let finished = matches!(
            message,
            ServerMessage::State {
                state: PresentationState::Finished
            }
        );
        let Ok(text) = serde_json::to_string(&message) else {
            continue;
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
        if finished {
            let _ = signals.send(WriterSignal::Finished);
        }
    }
    let _ = signals.send(WriterSignal::Closed);
}

/// Live transcription for one connection, opened on first audio
struct Microphone {
    live: Option<LiveTranscription>,
    /// Set when no transcription can be opened for this connection
    disabled: bool,
}

impl Microphone {
    const fn new() -> Self {
        Self {
            live: None,
            disabled: false,
        }
    }

    const fn accepts_audio(&self) -> bool {
        !self.disabled
    }

    async fn relay(
        &mut self,
        key: Option<&SecretString>,
        model: &str,
        language: Language,
        audio: Vec<u8>,
    ) {
        if !self.accepts_audio() {
            return;
        }

        if self.live.is_none() {
            let Some(key) = key else {
                tracing::warn!("microphone audio received but DEEPGRAM_API_KEY not set");
                self.disabled = true;
                return;
            };
            let options = LiveOptions::new(model, language);
            match LiveTranscription::connect(key, &options).await {
                Ok(live) => self.live = Some(live),
                Err(e) => {
                    tracing::error!(error = %e, "failed to open live transcription");
                    self.disabled = true;
                    return;
                }
            }
        }

        if let Some(sender) = self.live.as_ref().and_then(LiveTranscription::audio_sender)
            && sender.try_send(audio).is_err()
        {
            tracing::debug!("dropping microphone audio, transcription is behind");
        }
    }

    /// Next transcript event; pending while no transcription is open
    async fn next_event(&mut self) -> Option<TranscriptEvent> {
        match &mut self.live {
            Some(live) => live.next_event().await,
            None => std::future::pending().await,
        }
    }

    /// Release the transcription socket; the next audio frame reopens it
    async fn close(&mut self) {
        if let Some(live) = self.live.take() {
            live.close().await;
            tracing::debug!("live transcription closed");
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<ApiState>, query: PresentationQuery) {
    let (mut sender, mut receiver) = socket.split();

    let language = match query.language.as_deref() {
        None | Some("") => Language::default(),
        Some(tag) => match tag.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                let _ = sender.send(error_frame(&e.to_string())).await;
                return;
            }
        },
    };
    let session_id = query
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let (outbound_tx, outbound) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let deps = RuntimeDeps::new(
        Arc::clone(&state.pipeline),
        language,
        session_id.clone(),
        &state.presenter,
    );
    let handle = match PresentationRuntime::start(deps, &state.presenter, outbound_tx) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start presentation");
            let _ = sender.send(error_frame(&e.to_string())).await;
            return;
        }
    };

    tracing::info!(session_id = %session_id, %language, "presentation socket connected");

    let (signal_tx, mut signals) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outbound(sender, outbound, signal_tx));
    let mut microphone = Microphone::new();

    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Some(WriterSignal::Finished) => microphone.close().await,
                Some(WriterSignal::Closed) | None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if !forward_client_message(&handle, &text).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(audio))) => {
                    microphone
                        .relay(
                            state.deepgram_key.as_ref(),
                            &state.stt_model,
                            language,
                            audio.to_vec(),
                        )
                        .await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id = %session_id, "presentation socket closed by client");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "presentation socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            transcript = microphone.next_event() => match transcript {
                Some(TranscriptEvent::Transcript { text, is_final }) => {
                    if !handle.send(Event::Transcript { text, is_final }).await {
                        break;
                    }
                }
                Some(TranscriptEvent::UtteranceEnd) => {
                    if !handle.send(Event::UtteranceEnd).await {
                        break;
                    }
                }
                None => {
                    tracing::debug!("live transcription ended");
                    microphone.live = None;
                }
            },
        }
    }

    microphone.close().await;
    writer.abort();
    handle.shutdown().await;
    tracing::info!(session_id = %session_id, "presentation socket disconnected");
}

/// Parse a client frame and pass it on; `false` once the presentation is gone
async fn forward_client_message(handle: &PresentationHandle, text: &str) -> bool {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => handle.send(message.into()).await,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed client message");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_map_to_events() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"audio_ended","playback":4}"#).unwrap();
        assert_eq!(Event::from(message), Event::AudioEnded { playback: 4 });

        let message: ClientMessage = serde_json::from_str(r#"{"type":"next"}"#).unwrap();
        assert_eq!(Event::from(message), Event::Advance);

        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"goto","slide":-3}"#).unwrap();
        assert_eq!(Event::from(message), Event::Goto { slide: -3 });
    }

    fn text_of(message: &Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_writer_signals_finish_then_close() {
        let (sink, mut frames) = futures::channel::mpsc::unbounded::<Message>();
        let (outbound_tx, outbound) = mpsc::channel(4);
        let (signal_tx, mut signals) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_outbound(sink, outbound, signal_tx));

        outbound_tx
            .send(ServerMessage::Highlight { section: 1 })
            .await
            .unwrap();
        outbound_tx
            .send(ServerMessage::State {
                state: PresentationState::Finished,
            })
            .await
            .unwrap();
        drop(outbound_tx);
        writer.await.unwrap();

        assert_eq!(text_of(&frames.next().await.unwrap())["type"], "highlight");
        assert_eq!(text_of(&frames.next().await.unwrap())["state"], "finished");
        assert_eq!(signals.recv().await, Some(WriterSignal::Finished));
        assert_eq!(signals.recv().await, Some(WriterSignal::Closed));
    }

    #[tokio::test]
    async fn test_writer_stops_when_socket_is_gone() {
        let (sink, frames) = futures::channel::mpsc::unbounded::<Message>();
        drop(frames);
        let (outbound_tx, outbound) = mpsc::channel(4);
        let (signal_tx, mut signals) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_outbound(sink, outbound, signal_tx));

        outbound_tx
            .send(ServerMessage::Stop { playback: 1 })
            .await
            .unwrap();
        writer.await.unwrap();

        assert_eq!(signals.recv().await, Some(WriterSignal::Closed));
        assert!(outbound_tx.send(ServerMessage::Stop { playback: 2 }).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_keep_flowing_while_client_reads_slowly() {
        use std::time::Duration;

        use crate::chat::ChatPipeline;
        use crate::config::PresenterConfig;
        use crate::narration::NarrationStore;
        use crate::session::MemoryHistory;

        let pipeline = Arc::new(ChatPipeline::new(
            Arc::new(NarrationStore::embedded().unwrap()),
            Arc::new(MemoryHistory::new()),
        ));
        let config = PresenterConfig::default();
        let (outbound_tx, outbound) = mpsc::channel(1);
        let handle = PresentationRuntime::start(
            RuntimeDeps::new(pipeline, Language::En, "slow-reader", &config),
            &config,
            outbound_tx,
        )
        .unwrap();

        // A client that takes a while to read each frame
        let (sink, mut frames) = futures::channel::mpsc::channel::<Message>(0);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if frames.next().await.is_none() {
                    break;
                }
            }
        });
        let (signal_tx, _signals) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_outbound(sink, outbound, signal_tx));

        assert!(handle.send(Event::Start).await);
        for i in 0..200 {
            let event = if i % 2 == 0 {
                Event::Advance
            } else {
                Event::Goto { slide: i % 12 }
            };
            let sent = tokio::time::timeout(Duration::from_secs(60), handle.send(event))
                .await
                .expect("presentation stopped taking commands");
            assert!(sent);
        }

        writer.abort();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_microphone_reopens_after_close() {
        let mut microphone = Microphone::new();
        microphone.close().await;
        assert!(microphone.accepts_audio());

        microphone.relay(None, "nova-2", Language::En, vec![0; 4]).await;
        assert!(!microphone.accepts_audio());
    }

    #[test]
    fn test_server_side_events_are_not_accepted() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"timer_fired","timer":1}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"answer_ready"}"#).is_err());
    }
}
