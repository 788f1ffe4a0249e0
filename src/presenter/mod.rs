//! Presentation controller
//!
//! [`Presenter`] is a pure state machine: it consumes [`Event`]s (client
//! reports, adapter results, timer firings) and returns the [`Effect`]s the
//! caller must carry out. It never performs I/O, so every transition can be
//! driven directly in tests. [`runtime::PresentationRuntime`] executes the
//! effects with tokio.
//!
//! Ids for playbacks, adapter requests and timers all come from one
//! increasing counter. Results and firings carrying an id that is no longer
//! current are ignored, which is what keeps late audio-ended reports, late
//! synthesis results and cancelled timers harmless.

pub mod highlight;
pub mod runtime;

use std::time::Duration;

use serde::Serialize;

use crate::config::PresenterConfig;
use crate::narration::Deck;
use crate::voice::{AudioRef, WakeWord};

/// Presentation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationState {
    Idle,
    Presenting,
    Listening,
    Processing,
    Answering,
    Finished,
}

/// What a playback is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackKind {
    Narration,
    Answer,
}

/// Purpose of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Pause between slides
    Advance,
    /// End of the visitor's utterance
    Silence,
}

/// Result of a submitted question
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Answered { text: String, audio: AudioRef },
    Failed,
}

/// Controller input
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Begin presenting from the first slide
    Start,
    /// Narration audio for a slide is ready (`None` when synthesis failed)
    NarrationReady {
        request: u64,
        audio: Option<AudioRef>,
    },
    /// The client finished playing a clip
    AudioEnded { playback: u64 },
    /// Playback position report, in seconds
    AudioProgress {
        playback: u64,
        position: f64,
        duration: f64,
    },
    /// Live transcript fragment
    Transcript { text: String, is_final: bool },
    /// The transcription service detected an utterance boundary
    UtteranceEnd,
    TimerFired { timer: u64 },
    AnswerReady { request: u64, outcome: AnswerOutcome },
    /// Manual "next slide"
    Advance,
    /// Manual jump to a slide
    Goto { slide: i64 },
    SkipToEnd,
}

/// Fixed messages shown to the visitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The generated answer text
    Answer(String),
    /// The question could not be answered
    Apology,
    /// The last slide has been presented
    Finished,
}

/// Controller output, to be carried out in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    State(PresentationState),
    ShowSlide { slide: usize },
    RequestNarration { request: u64, slide: usize },
    Play {
        playback: u64,
        audio: AudioRef,
        kind: PlaybackKind,
    },
    Stop { playback: u64 },
    Highlight { section: usize },
    StartTimer {
        timer: u64,
        kind: TimerKind,
        after: Duration,
    },
    CancelTimer { timer: u64 },
    SubmitQuestion {
        request: u64,
        question: String,
        slide: usize,
    },
    /// Text captured so far while listening
    Listening { transcript: String },
    Notice(Notice),
}

/// Transcript collected after the wake word
#[derive(Debug, Default)]
struct UtteranceCapture {
    final_text: String,
    interim_text: String,
}

impl UtteranceCapture {
    fn update(&mut self, text: &str, is_final: bool) {
        if is_final {
            if !text.is_empty() {
                if !self.final_text.is_empty() {
                    self.final_text.push(' ');
                }
                self.final_text.push_str(text);
            }
            self.interim_text.clear();
        } else {
            self.interim_text = text.to_string();
        }
    }

    fn text(&self) -> String {
        format!("{} {}", self.final_text, self.interim_text)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Copy)]
struct Playback {
    id: u64,
    kind: PlaybackKind,
}

/// Presentation state machine for one visitor
#[derive(Debug)]
pub struct Presenter {
    state: PresentationState,
    sections: Vec<usize>,
    wake: WakeWord,
    advance_delay: Duration,
    silence_timeout: Duration,

    current_slide: usize,
    saved_slide: usize,
    busy: bool,
    id_counter: u64,

    playback: Option<Playback>,
    highlighted: Option<usize>,
    pending_narration: Option<u64>,
    pending_answer: Option<u64>,
    advance_timer: Option<u64>,
    silence_timer: Option<u64>,
    capture: Option<UtteranceCapture>,
}

impl Presenter {
    /// Create a presenter for a deck
    #[must_use]
    pub fn new(deck: &Deck, config: &PresenterConfig) -> Self {
        Self {
            state: PresentationState::Idle,
            sections: deck.slides().iter().map(|s| s.sections.len()).collect(),
            wake: WakeWord::new(&config.wake_word),
            advance_delay: config.advance_delay,
            silence_timeout: config.silence_timeout,
            current_slide: 0,
            saved_slide: 0,
            busy: false,
            id_counter: 0,
            playback: None,
            highlighted: None,
            pending_narration: None,
            pending_answer: None,
            advance_timer: None,
            silence_timer: None,
            capture: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> PresentationState {
        self.state
    }

    #[must_use]
    pub const fn current_slide(&self) -> usize {
        self.current_slide
    }

    /// Slide the presentation returns to after a question
    #[must_use]
    pub const fn saved_slide(&self) -> usize {
        self.saved_slide
    }

    /// Whether an advance is already in flight
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Id of the playback the client should currently be playing
    #[must_use]
    pub fn active_playback(&self) -> Option<u64> {
        self.playback.map(|p| p.id)
    }

    fn last_slide(&self) -> usize {
        self.sections.len().saturating_sub(1)
    }

    fn clamp(&self, slide: i64) -> usize {
        let last = self.last_slide();
        usize::try_from(slide.max(0)).map_or(last, |s| s.min(last))
    }

    fn next_id(&mut self) -> u64 {
        self.id_counter += 1;
        self.id_counter
    }

    /// Apply one event
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut fx = Vec::new();
        let before = self.state;

        match event {
            Event::Start => self.on_start(&mut fx),
            Event::NarrationReady { request, audio } => {
                self.on_narration_ready(request, audio, &mut fx);
            }
            Event::AudioEnded { playback } => self.on_audio_ended(playback, &mut fx),
            Event::AudioProgress {
                playback,
                position,
                duration,
            } => self.on_progress(playback, position, duration, &mut fx),
            Event::Transcript { text, is_final } => self.on_transcript(&text, is_final, &mut fx),
            Event::UtteranceEnd => {
                if self.state == PresentationState::Listening {
                    self.arm_silence(&mut fx);
                }
            }
            Event::TimerFired { timer } => self.on_timer(timer, &mut fx),
            Event::AnswerReady { request, outcome } => {
                self.on_answer(request, outcome, &mut fx);
            }
            Event::Advance => {
                if self.state == PresentationState::Presenting
                    && !self.busy
                    && self.current_slide < self.last_slide()
                {
                    self.go_to(self.current_slide + 1, &mut fx);
                }
            }
            Event::Goto { slide } => {
                if self.state == PresentationState::Presenting && !self.busy {
                    let target = self.clamp(slide);
                    self.go_to(target, &mut fx);
                }
            }
            Event::SkipToEnd => self.on_skip_to_end(&mut fx),
        }

        if self.state != before {
            tracing::debug!(from = ?before, to = ?self.state, slide = self.current_slide, "presentation state changed");
            fx.insert(0, Effect::State(self.state));
        }
        fx
    }

    fn on_start(&mut self, fx: &mut Vec<Effect>) {
        if !matches!(
            self.state,
            PresentationState::Idle | PresentationState::Finished
        ) || self.sections.is_empty()
        {
            return;
        }
        self.state = PresentationState::Presenting;
        self.saved_slide = 0;
        self.go_to(0, fx);
    }

    /// Show a slide and request its narration, dropping whatever was playing
    fn go_to(&mut self, slide: usize, fx: &mut Vec<Effect>) {
        self.stop_playback(fx);
        self.cancel_advance(fx);
        self.current_slide = slide;
        fx.push(Effect::ShowSlide { slide });

        let request = self.next_id();
        self.pending_narration = Some(request);
        self.busy = true;
        fx.push(Effect::RequestNarration { request, slide });
    }

    fn on_narration_ready(&mut self, request: u64, audio: Option<AudioRef>, fx: &mut Vec<Effect>) {
        if self.state != PresentationState::Presenting || self.pending_narration != Some(request) {
            return;
        }
        self.pending_narration = None;

        match audio.filter(|a| !a.is_empty()) {
            Some(audio) => {
                self.busy = false;
                self.play(audio, PlaybackKind::Narration, fx);
                if self.sections.get(self.current_slide).is_some_and(|n| *n > 0) {
                    self.highlighted = Some(0);
                    fx.push(Effect::Highlight { section: 0 });
                }
            }
            None => {
                tracing::warn!(slide = self.current_slide, "no narration audio, skipping slide");
                self.narration_finished(fx);
            }
        }
    }

    fn on_audio_ended(&mut self, playback: u64, fx: &mut Vec<Effect>) {
        let Some(active) = self.playback.filter(|p| p.id == playback) else {
            return;
        };
        self.playback = None;
        self.highlighted = None;

        match (self.state, active.kind) {
            (PresentationState::Presenting, PlaybackKind::Narration) => self.narration_finished(fx),
            (PresentationState::Answering, PlaybackKind::Answer) => self.resume(fx),
            _ => {}
        }
    }

    /// Narration for the current slide is over: finish or wait, then advance
    fn narration_finished(&mut self, fx: &mut Vec<Effect>) {
        if self.current_slide >= self.last_slide() {
            self.finish(fx);
            return;
        }
        self.busy = true;
        let timer = self.next_id();
        self.advance_timer = Some(timer);
        fx.push(Effect::StartTimer {
            timer,
            kind: TimerKind::Advance,
            after: self.advance_delay,
        });
    }

    fn on_progress(&mut self, playback: u64, position: f64, duration: f64, fx: &mut Vec<Effect>) {
        let narrating = self
            .playback
            .is_some_and(|p| p.id == playback && p.kind == PlaybackKind::Narration);
        if !narrating || self.state != PresentationState::Presenting {
            return;
        }
        let sections = self.sections.get(self.current_slide).copied().unwrap_or(0);
        if let Some(section) = highlight::section_for(position, duration, sections)
            && self.highlighted != Some(section)
        {
            self.highlighted = Some(section);
            fx.push(Effect::Highlight { section });
        }
    }

    fn on_transcript(&mut self, text: &str, is_final: bool, fx: &mut Vec<Effect>) {
        match self.state {
            PresentationState::Presenting | PresentationState::Answering => {
                let Some(command) = self.wake.extract_command(text) else {
                    return;
                };
                tracing::info!(transcript = text, "wake word detected");

                if self.state == PresentationState::Presenting {
                    self.saved_slide = self.current_slide;
                }
                self.stop_playback(fx);
                self.cancel_advance(fx);
                self.pending_narration = None;
                self.busy = false;

                let mut capture = UtteranceCapture::default();
                capture.update(&command, is_final);
                fx.push(Effect::Listening {
                    transcript: capture.text(),
                });
                self.capture = Some(capture);
                self.state = PresentationState::Listening;
                self.arm_silence(fx);
            }
            PresentationState::Listening => {
                let text = self
                    .wake
                    .extract_command(text)
                    .unwrap_or_else(|| text.trim().to_string());
                if let Some(capture) = self.capture.as_mut() {
                    capture.update(&text, is_final);
                    fx.push(Effect::Listening {
                        transcript: capture.text(),
                    });
                }
                self.arm_silence(fx);
            }
            _ => {}
        }
    }

    fn arm_silence(&mut self, fx: &mut Vec<Effect>) {
        if let Some(timer) = self.silence_timer.take() {
            fx.push(Effect::CancelTimer { timer });
        }
        let timer = self.next_id();
        self.silence_timer = Some(timer);
        fx.push(Effect::StartTimer {
            timer,
            kind: TimerKind::Silence,
            after: self.silence_timeout,
        });
    }

    fn on_timer(&mut self, timer: u64, fx: &mut Vec<Effect>) {
        if self.advance_timer == Some(timer) {
            self.advance_timer = None;
            if self.state == PresentationState::Presenting {
                self.go_to(self.current_slide + 1, fx);
            }
        } else if self.silence_timer == Some(timer) {
            self.silence_timer = None;
            if self.state == PresentationState::Listening {
                self.end_utterance(fx);
            }
        }
    }

    fn end_utterance(&mut self, fx: &mut Vec<Effect>) {
        let question = self.capture.take().map(|c| c.text()).unwrap_or_default();

        if question.is_empty() {
            tracing::debug!("empty utterance, resuming");
            self.resume(fx);
            return;
        }

        self.state = PresentationState::Processing;
        let request = self.next_id();
        self.pending_answer = Some(request);
        fx.push(Effect::SubmitQuestion {
            request,
            question,
            slide: self.saved_slide,
        });
    }

    fn on_answer(&mut self, request: u64, outcome: AnswerOutcome, fx: &mut Vec<Effect>) {
        if self.state != PresentationState::Processing || self.pending_answer != Some(request) {
            return;
        }
        self.pending_answer = None;

        match outcome {
            AnswerOutcome::Answered { text, audio } => {
                fx.push(Effect::Notice(Notice::Answer(text)));
                if audio.is_empty() {
                    self.resume(fx);
                } else {
                    self.state = PresentationState::Answering;
                    self.play(audio, PlaybackKind::Answer, fx);
                }
            }
            AnswerOutcome::Failed => {
                fx.push(Effect::Notice(Notice::Apology));
                self.resume(fx);
            }
        }
    }

    /// Back to the slide that was interrupted
    fn resume(&mut self, fx: &mut Vec<Effect>) {
        self.state = PresentationState::Presenting;
        self.go_to(self.saved_slide, fx);
    }

    fn on_skip_to_end(&mut self, fx: &mut Vec<Effect>) {
        if self.state == PresentationState::Finished || self.sections.is_empty() {
            return;
        }
        self.stop_playback(fx);
        self.cancel_advance(fx);
        if let Some(timer) = self.silence_timer.take() {
            fx.push(Effect::CancelTimer { timer });
        }
        self.pending_narration = None;
        self.pending_answer = None;
        self.capture = None;

        self.current_slide = self.last_slide();
        fx.push(Effect::ShowSlide {
            slide: self.current_slide,
        });
        self.finish(fx);
    }

    fn finish(&mut self, fx: &mut Vec<Effect>) {
        self.state = PresentationState::Finished;
        self.busy = false;
        fx.push(Effect::Notice(Notice::Finished));
    }

    fn play(&mut self, audio: AudioRef, kind: PlaybackKind, fx: &mut Vec<Effect>) {
        self.stop_playback(fx);
        let playback = self.next_id();
        self.playback = Some(Playback { id: playback, kind });
        fx.push(Effect::Play {
            playback,
            audio,
            kind,
        });
    }

    fn stop_playback(&mut self, fx: &mut Vec<Effect>) {
        if let Some(active) = self.playback.take() {
            fx.push(Effect::Stop {
                playback: active.id,
            });
        }
        self.highlighted = None;
    }

    fn cancel_advance(&mut self, fx: &mut Vec<Effect>) {
        if let Some(timer) = self.advance_timer.take() {
            fx.push(Effect::CancelTimer { timer });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::{Language, NarrationStore};

    fn presenter() -> Presenter {
        let store = NarrationStore::embedded().unwrap();
        Presenter::new(store.deck(Language::En).unwrap(), &PresenterConfig::default())
    }

    fn narration_request(fx: &[Effect]) -> u64 {
        fx.iter()
            .find_map(|e| match e {
                Effect::RequestNarration { request, .. } => Some(*request),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_start_shows_first_slide() {
        let mut p = presenter();
        let fx = p.handle(Event::Start);

        assert_eq!(fx[0], Effect::State(PresentationState::Presenting));
        assert!(fx.contains(&Effect::ShowSlide { slide: 0 }));
        assert!(p.is_busy());

        // a second start is ignored
        assert!(p.handle(Event::Start).is_empty());
    }

    #[test]
    fn test_failed_narration_still_waits_before_advancing() {
        let mut p = presenter();
        let request = narration_request(&p.handle(Event::Start));

        let fx = p.handle(Event::NarrationReady { request, audio: None });
        assert!(matches!(
            fx.as_slice(),
            [Effect::StartTimer { kind: TimerKind::Advance, .. }]
        ));
        assert_eq!(p.current_slide(), 0);
    }

    #[test]
    fn test_stale_narration_result_ignored() {
        let mut p = presenter();
        let request = narration_request(&p.handle(Event::Start));
        let fx = p.handle(Event::NarrationReady {
            request: request + 100,
            audio: Some(AudioRef::from_url("a")),
        });
        assert!(fx.is_empty());
        assert_eq!(p.active_playback(), None);
    }

    #[test]
    fn test_utterance_capture_accumulates_final_text() {
        let mut capture = UtteranceCapture::default();
        capture.update("what", false);
        capture.update("what is", true);
        capture.update("the market", false);
        assert_eq!(capture.text(), "what is the market");
    }
}
