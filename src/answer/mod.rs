//! Answer generation
//!
//! Combines retrieved context, recent conversation turns and the current
//! slide position into one model call. The model signals slide movement with
//! in-band markers (`[NEXT_SLIDE]`, `[GOTO_SLIDE:n]`); they are parsed out
//! here and returned as a structured [`Directive`], never as text.

mod anthropic;
pub mod prompt;
mod sse;

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

pub use anthropic::{AnthropicClient, LanguageModel, TextStream};
pub use prompt::PromptMode;
pub use sse::{SseEvent, SseParser};

use crate::Result;
use crate::narration::Deck;
use crate::retrieval::{Passage, context_block};
use crate::session::{ConversationTurn, recent};

static NEXT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[NEXT_SLIDE\]").expect("valid regex"));

/// Any GOTO-shaped marker, well formed or not
static GOTO_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[GOTO_SLIDE:([^\]]*)\]").expect("valid regex"));

/// Requested slide movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "slide", rename_all = "lowercase")]
pub enum Directive {
    /// Advance one slide
    Next,
    /// Jump to a slide index
    Goto(usize),
}

/// Generated answer with the markers stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub directive: Option<Directive>,
}

impl Answer {
    /// Slide to show after this answer, clamped to the deck
    #[must_use]
    pub fn target_slide(&self, current: usize, deck: &Deck) -> usize {
        let target = match self.directive {
            None => current,
            Some(Directive::Next) => current.saturating_add(1),
            Some(Directive::Goto(slide)) => slide,
        };
        target.min(deck.last_index())
    }
}

/// Split raw model output into text and directive
///
/// A well-formed GOTO wins over NEXT. Malformed GOTO markers are removed and
/// otherwise ignored.
#[must_use]
pub fn parse_directive(raw: &str) -> Answer {
    let goto = GOTO_MARKER
        .captures_iter(raw)
        .find_map(|c| c.get(1).and_then(|m| m.as_str().trim().parse::<usize>().ok()));

    let directive = match goto {
        Some(slide) => Some(Directive::Goto(slide)),
        None if NEXT_MARKER.is_match(raw) => Some(Directive::Next),
        None => None,
    };

    let text = GOTO_MARKER.replace_all(raw, "");
    let text = NEXT_MARKER.replace_all(&text, "");

    Answer {
        text: text.trim().to_string(),
        directive,
    }
}

/// Everything the generator needs for one question
#[derive(Debug, Clone, Copy)]
pub struct AnswerRequest<'a> {
    pub question: &'a str,
    pub deck: &'a Deck,
    pub current_slide: usize,
    pub passages: &'a [Passage],
    pub history: &'a [ConversationTurn],
    pub mode: PromptMode,
}

/// Generates presenter answers with a [`LanguageModel`]
pub struct AnswerGenerator {
    model: Arc<dyn LanguageModel>,
    max_tokens: u32,
    history_window: usize,
}

impl AnswerGenerator {
    #[must_use]
    pub fn new(model: Arc<dyn LanguageModel>, max_tokens: u32, history_window: usize) -> Self {
        Self {
            model,
            max_tokens,
            history_window,
        }
    }

    /// Underlying model
    #[must_use]
    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    /// Answer a question
    ///
    /// # Errors
    ///
    /// Returns error if the model call fails
    pub async fn generate(&self, request: AnswerRequest<'_>) -> Result<Answer> {
        let context = context_block(request.passages);
        let system = prompt::system_prompt(
            request.deck,
            request.current_slide,
            &context,
            request.mode,
        );

        let mut messages = recent(request.history, self.history_window).to_vec();
        messages.push(ConversationTurn::user(request.question));

        let raw = self
            .model
            .complete(&system, &messages, self.max_tokens)
            .await?;
        let answer = parse_directive(&raw);

        tracing::debug!(
            directive = ?answer.directive,
            chars = answer.text.len(),
            slide = request.current_slide,
            "answer generated"
        );
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narration::{Language, NarrationStore};

    #[test]
    fn test_no_marker_means_stay() {
        let answer = parse_directive("  Our market is large.  ");
        assert_eq!(answer.text, "Our market is large.");
        assert_eq!(answer.directive, None);
    }

    #[test]
    fn test_next_marker() {
        let answer = parse_directive("Moving on. [NEXT_SLIDE]");
        assert_eq!(answer.text, "Moving on.");
        assert_eq!(answer.directive, Some(Directive::Next));
    }

    #[test]
    fn test_goto_wins_and_all_markers_stripped() {
        let answer = parse_directive("[NEXT_SLIDE] See the plan [GOTO_SLIDE:7] here.");
        assert_eq!(answer.directive, Some(Directive::Goto(7)));
        assert!(!answer.text.contains('['));
    }

    #[test]
    fn test_malformed_goto_ignored() {
        let answer = parse_directive("Hmm [GOTO_SLIDE:abc] ok");
        assert_eq!(answer.directive, None);
        assert_eq!(answer.text, "Hmm  ok");

        let answer = parse_directive("[GOTO_SLIDE:-1][NEXT_SLIDE]");
        assert_eq!(answer.directive, Some(Directive::Next));
        assert_eq!(answer.text, "");
    }

    #[test]
    fn test_target_slide_is_clamped() {
        let store = NarrationStore::embedded().unwrap();
        let deck = store.deck(Language::En).unwrap();

        let stay = Answer { text: String::new(), directive: None };
        assert_eq!(stay.target_slide(3, deck), 3);

        let next = Answer { text: String::new(), directive: Some(Directive::Next) };
        assert_eq!(next.target_slide(3, deck), 4);
        assert_eq!(next.target_slide(deck.last_index(), deck), deck.last_index());

        let far = Answer { text: String::new(), directive: Some(Directive::Goto(99)) };
        assert_eq!(far.target_slide(0, deck), deck.last_index());
    }
}
