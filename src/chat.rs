//! Question answering pipeline
//!
//! retrieval + history → answer generation → (persist ‖ synthesize)

use std::sync::Arc;

use crate::answer::{Answer, AnswerGenerator, AnswerRequest, PromptMode};
use crate::narration::{Language, NarrationStore};
use crate::retrieval::ContextRetriever;
use crate::session::{ConversationTurn, HistoryStore};
use crate::voice::{AudioRef, SpeechSynthesizer};
use crate::{Error, Result};

/// Message that asks the presenter to introduce itself and begin
pub const INTRODUCE_AND_START: &str = "introduce_and_start";

/// Session used when the caller does not name one
pub const DEFAULT_SESSION: &str = "default";

/// A chat turn from the visitor
#[derive(Debug, Clone)]
pub struct ChatInput {
    pub message: String,
    pub language: Language,
    pub current_slide: i64,
    pub session_id: String,
    /// Speak `message` as-is without calling the model
    pub text_only: bool,
    /// Answer in question mode and keep the current slide
    pub is_question: bool,
}

/// Reply to a chat turn
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub message: String,
    pub next_slide: usize,
    pub audio: AudioRef,
}

/// Answer plus its synthesized audio
#[derive(Debug, Clone)]
pub struct SpokenAnswer {
    pub answer: Answer,
    pub audio: AudioRef,
}

/// Shared question answering pipeline
pub struct ChatPipeline {
    narrations: Arc<NarrationStore>,
    history: Arc<dyn HistoryStore>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    generator: Option<Arc<AnswerGenerator>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
}

impl ChatPipeline {
    #[must_use]
    pub fn new(narrations: Arc<NarrationStore>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            narrations,
            history,
            retriever: None,
            generator: None,
            speech: None,
        }
    }

    #[must_use]
    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn with_speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    #[must_use]
    pub fn narrations(&self) -> &Arc<NarrationStore> {
        &self.narrations
    }

    #[must_use]
    pub fn speech(&self) -> Option<&Arc<dyn SpeechSynthesizer>> {
        self.speech.as_ref()
    }

    #[must_use]
    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Handle one chat turn
    ///
    /// # Errors
    ///
    /// Returns error if the language has no deck or answer generation fails
    pub async fn handle(&self, input: ChatInput) -> Result<ChatReply> {
        let deck = self.narrations.deck(input.language)?;
        let current = deck.clamp(input.current_slide);

        if input.message == INTRODUCE_AND_START {
            // A fresh introduction starts a fresh conversation
            let greeting = deck.greeting().to_string();
            let (audio, ()) = tokio::join!(
                self.speak(&greeting, input.language),
                self.history.clear(&input.session_id),
            );
            return Ok(ChatReply {
                message: greeting,
                next_slide: 0,
                audio,
            });
        }

        if input.text_only {
            let audio = self.speak(&input.message, input.language).await;
            return Ok(ChatReply {
                message: input.message,
                next_slide: current,
                audio,
            });
        }

        let mode = if input.is_question {
            PromptMode::Question
        } else {
            PromptMode::Presenting
        };
        let spoken = self
            .answer(&input.message, input.language, current, &input.session_id, mode)
            .await?;

        let next_slide = if input.is_question {
            current
        } else {
            spoken.answer.target_slide(current, deck)
        };

        Ok(ChatReply {
            message: spoken.answer.text,
            next_slide,
            audio: spoken.audio,
        })
    }

    /// Answer a question and synthesize the reply
    ///
    /// History is persisted while the audio is synthesized; both finish
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Returns error if no generator is configured or generation fails
    pub async fn answer(
        &self,
        question: &str,
        language: Language,
        current_slide: usize,
        session_id: &str,
        mode: PromptMode,
    ) -> Result<SpokenAnswer> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| Error::Config("ANTHROPIC_API_KEY not set".to_string()))?;
        let deck = self.narrations.deck(language)?;

        let (passages, history) = tokio::join!(
            self.retrieve(question, language),
            self.history.load(session_id),
        );

        let answer = generator
            .generate(AnswerRequest {
                question,
                deck,
                current_slide,
                passages: &passages,
                history: &history,
                mode,
            })
            .await?;

        let turns = [
            ConversationTurn::user(question),
            ConversationTurn::assistant(answer.text.clone()),
        ];
        let ((), audio) = tokio::join!(
            self.history.append(session_id, &turns),
            self.speak(&answer.text, language),
        );

        tracing::info!(
            session_id,
            %language,
            slide = current_slide,
            passages = passages.len(),
            has_audio = !audio.is_empty(),
            "question answered"
        );

        Ok(SpokenAnswer { answer, audio })
    }

    async fn retrieve(&self, question: &str, language: Language) -> Vec<crate::retrieval::Passage> {
        match &self.retriever {
            Some(retriever) => retriever.retrieve(question, language).await,
            None => Vec::new(),
        }
    }

    /// Synthesize speech, degrading to no audio on failure
    pub async fn speak(&self, text: &str, language: Language) -> AudioRef {
        let Some(speech) = &self.speech else {
            return AudioRef::empty();
        };
        if text.trim().is_empty() {
            return AudioRef::empty();
        }
        speech.synthesize(text, language).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, %language, "speech synthesis failed");
            AudioRef::empty()
        })
    }
}
