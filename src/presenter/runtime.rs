//! Tokio driver for the presentation state machine
//!
//! One task per presentation processes events strictly in order. Adapter
//! calls and timers run as child tasks that post their results back as
//! events; all of them are aborted when the presentation ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

use super::{AnswerOutcome, Effect, Event, Notice, PlaybackKind, PresentationState, Presenter};
use crate::answer::PromptMode;
use crate::chat::ChatPipeline;
use crate::config::PresenterConfig;
use crate::narration::{Deck, Language};
use crate::Result;

/// Buffered client commands per presentation
const COMMAND_BUFFER: usize = 64;

/// Message sent to the browser client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State {
        state: PresentationState,
    },
    Slide {
        index: usize,
        title: String,
        display_text: String,
        sections: Vec<String>,
    },
    Play {
        playback: u64,
        audio_url: String,
        kind: PlaybackKind,
    },
    Stop {
        playback: u64,
    },
    Highlight {
        section: usize,
    },
    Listening {
        transcript: String,
    },
    Message {
        kind: &'static str,
        text: String,
    },
}

/// What a presentation needs from the rest of the service
#[derive(Clone)]
pub struct RuntimeDeps {
    pub pipeline: Arc<ChatPipeline>,
    pub language: Language,
    pub session_id: String,
    pub narration_timeout: Duration,
    pub answer_timeout: Duration,
}

impl RuntimeDeps {
    #[must_use]
    pub fn new(
        pipeline: Arc<ChatPipeline>,
        language: Language,
        session_id: impl Into<String>,
        config: &PresenterConfig,
    ) -> Self {
        Self {
            pipeline,
            language,
            session_id: session_id.into(),
            narration_timeout: config.narration_timeout,
            answer_timeout: config.answer_timeout,
        }
    }
}

/// Handle to a running presentation
pub struct PresentationHandle {
    commands: mpsc::Sender<Event>,
    task: JoinHandle<()>,
}

impl PresentationHandle {
    /// Forward an event; returns `false` once the presentation has stopped
    pub async fn send(&self, event: Event) -> bool {
        self.commands.send(event).await.is_ok()
    }

    /// Stop the presentation and wait for its task to wind down
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            tracing::debug!(error = %e, "presentation task ended abnormally");
        }
    }
}

/// Executes [`Effect`]s for one [`Presenter`]
pub struct PresentationRuntime {
    presenter: Presenter,
    deps: RuntimeDeps,
    outbound: mpsc::Sender<ServerMessage>,
    feedback_tx: mpsc::UnboundedSender<Event>,
    feedback_rx: mpsc::UnboundedReceiver<Event>,
    tasks: JoinSet<()>,
    timers: HashMap<u64, AbortHandle>,
}

impl PresentationRuntime {
    /// Build a presenter for the requested language and start driving it
    ///
    /// # Errors
    ///
    /// Returns error if there is no deck for the language
    pub fn start(
        deps: RuntimeDeps,
        config: &PresenterConfig,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<PresentationHandle> {
        let presenter = Presenter::new(deps.pipeline.narrations().deck(deps.language)?, config);
        Ok(Self::spawn(presenter, deps, outbound))
    }

    /// Drive an existing presenter
    #[must_use]
    pub fn spawn(
        presenter: Presenter,
        deps: RuntimeDeps,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> PresentationHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            presenter,
            deps,
            outbound,
            feedback_tx,
            feedback_rx,
            tasks: JoinSet::new(),
            timers: HashMap::new(),
        };
        let task = tokio::spawn(runtime.run(command_rx));

        PresentationHandle { commands, task }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Event>) {
        tracing::info!(language = %self.deps.language, session_id = %self.deps.session_id, "presentation started");

        loop {
            let event = tokio::select! {
                command = commands.recv() => match command {
                    Some(event) => event,
                    None => break,
                },
                Some(event) = self.feedback_rx.recv() => event,
                Some(_) = self.tasks.join_next(), if !self.tasks.is_empty() => continue,
            };

            if !self.dispatch(event).await {
                break;
            }
        }

        self.tasks.abort_all();
        tracing::info!(session_id = %self.deps.session_id, state = ?self.presenter.state(), "presentation stopped");
    }

    /// Run one event through the presenter; `false` once the client is gone
    async fn dispatch(&mut self, event: Event) -> bool {
        if let Event::TimerFired { timer } = event {
            self.timers.remove(&timer);
        }

        for effect in self.presenter.handle(event) {
            if !self.apply(effect).await {
                return false;
            }
        }
        true
    }

    fn deck(&self) -> Option<&Deck> {
        self.deps
            .pipeline
            .narrations()
            .deck(self.deps.language)
            .map_err(|e| tracing::error!(error = %e, "deck disappeared"))
            .ok()
    }

    async fn apply(&mut self, effect: Effect) -> bool {
        let message = match effect {
            Effect::State(state) => Some(ServerMessage::State { state }),
            Effect::ShowSlide { slide } => self.deck().and_then(|d| d.slide(slide)).map(|s| {
                ServerMessage::Slide {
                    index: s.index,
                    title: s.title.clone(),
                    display_text: s.display_text.clone(),
                    sections: s.sections.clone(),
                }
            }),
            Effect::RequestNarration { request, slide } => {
                self.request_narration(request, slide);
                None
            }
            Effect::Play {
                playback,
                audio,
                kind,
            } => Some(ServerMessage::Play {
                playback,
                audio_url: audio.into_string(),
                kind,
            }),
            Effect::Stop { playback } => Some(ServerMessage::Stop { playback }),
            Effect::Highlight { section } => Some(ServerMessage::Highlight { section }),
            Effect::StartTimer { timer, after, .. } => {
                let tx = self.feedback_tx.clone();
                let handle = self.tasks.spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Event::TimerFired { timer });
                });
                self.timers.insert(timer, handle);
                None
            }
            Effect::CancelTimer { timer } => {
                if let Some(handle) = self.timers.remove(&timer) {
                    handle.abort();
                }
                None
            }
            Effect::SubmitQuestion {
                request,
                question,
                slide,
            } => {
                self.submit_question(request, question, slide);
                None
            }
            Effect::Listening { transcript } => Some(ServerMessage::Listening { transcript }),
            Effect::Notice(notice) => Some(self.notice_message(notice)),
        };

        match message {
            Some(message) => self.outbound.send(message).await.is_ok(),
            None => true,
        }
    }

    fn notice_message(&self, notice: Notice) -> ServerMessage {
        match notice {
            Notice::Answer(text) => ServerMessage::Message {
                kind: "answer",
                text,
            },
            Notice::Apology => ServerMessage::Message {
                kind: "apology",
                text: self.deck().map(|d| d.apology().to_string()).unwrap_or_default(),
            },
            Notice::Finished => ServerMessage::Message {
                kind: "finished",
                text: self
                    .deck()
                    .map(|d| d.finished_message().to_string())
                    .unwrap_or_default(),
            },
        }
    }

    fn request_narration(&mut self, request: u64, slide: usize) {
        let text = self
            .deck()
            .and_then(|d| d.slide(slide))
            .map(|s| s.spoken_text.clone())
            .unwrap_or_default();
        let speech = self.deps.pipeline.speech().cloned();
        let language = self.deps.language;
        let limit = self.deps.narration_timeout;
        let tx = self.feedback_tx.clone();

        self.tasks.spawn(async move {
            let audio = match speech {
                None => None,
                Some(speech) => {
                    match tokio::time::timeout(limit, speech.synthesize(&text, language)).await {
                        Ok(Ok(audio)) => Some(audio),
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, slide, "narration synthesis failed");
                            None
                        }
                        Err(_) => {
                            tracing::warn!(slide, "narration synthesis timed out");
                            None
                        }
                    }
                }
            };
            let _ = tx.send(Event::NarrationReady { request, audio });
        });
    }

    fn submit_question(&mut self, request: u64, question: String, slide: usize) {
        let pipeline = Arc::clone(&self.deps.pipeline);
        let language = self.deps.language;
        let session_id = self.deps.session_id.clone();
        let limit = self.deps.answer_timeout;
        let tx = self.feedback_tx.clone();

        tracing::info!(question = %question, slide, "submitting spoken question");

        self.tasks.spawn(async move {
            let answer = pipeline.answer(&question, language, slide, &session_id, PromptMode::Question);
            let outcome = match tokio::time::timeout(limit, answer).await {
                Ok(Ok(spoken)) => AnswerOutcome::Answered {
                    text: spoken.answer.text,
                    audio: spoken.audio,
                },
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "answer generation failed");
                    AnswerOutcome::Failed
                }
                Err(_) => {
                    tracing::warn!("answer generation timed out");
                    AnswerOutcome::Failed
                }
            };
            let _ = tx.send(Event::AnswerReady { request, outcome });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_wire_format() {
        let json = serde_json::to_value(ServerMessage::Play {
            playback: 3,
            audio_url: "data:audio/mpeg;base64,AA".to_string(),
            kind: PlaybackKind::Narration,
        })
        .unwrap();
        assert_eq!(json["type"], "play");
        assert_eq!(json["kind"], "narration");
        assert_eq!(json["playback"], 3);

        let json = serde_json::to_value(ServerMessage::State {
            state: PresentationState::Listening,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "state", "state": "listening"}));
    }
}
