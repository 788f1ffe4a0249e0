//! System prompts for the presenter persona

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::narration::{Deck, Language};

/// What the model is being asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Walk through the current slide and move the deck forward
    Presenting,
    /// Answer a visitor's question without driving the deck
    Question,
}

/// Facts the voice assistant should always know
const KEY_FACTS: &str = "\
- NoVo is an AI-powered travel assistant combining emotional intelligence with practical travel features
- Following the \"Palantir playbook\": intuitive AI interfaces over complex data
- Target market: the $1.9 trillion global travel and lifestyle market
- Seeking £65,000 initial investment for MVP development
- SEIS eligible for UK investors (50% income tax relief)
- Phases: Research, MVP, Beta with TfL licence, European expansion";

/// One line per slide, so the model can name GOTO targets
#[must_use]
pub fn slide_mapping(deck: &Deck) -> String {
    let mut mapping = String::new();
    for slide in deck.slides() {
        let _ = writeln!(mapping, "- Slide {}: {}", slide.index, slide.title);
    }
    mapping
}

fn position_line(deck: &Deck, current_slide: usize) -> String {
    let last = deck.last_index();
    match deck.language() {
        Language::En if current_slide == 0 => {
            "You are on the COVER SLIDE (introduction). After introducing yourself and the \
             presentation, include [NEXT_SLIDE] to move to slide 1."
                .to_string()
        }
        Language::En => format!("You are on SLIDE {current_slide} of {last}."),
        Language::Pt if current_slide == 0 => {
            "Você está no SLIDE DE CAPA (introdução). Depois de se apresentar e apresentar a \
             apresentação, inclua [NEXT_SLIDE] para ir ao slide 1."
                .to_string()
        }
        Language::Pt => format!("Você está no SLIDE {current_slide} de {last}."),
    }
}

/// System prompt for slide presentation and typed questions
#[must_use]
pub fn system_prompt(deck: &Deck, current_slide: usize, context: &str, mode: PromptMode) -> String {
    let position = position_line(deck, current_slide);
    let mapping = slide_mapping(deck);

    match (deck.language(), mode) {
        (Language::En, PromptMode::Presenting) => format!(
            "You are NoVo, an AI presentation assistant for NoVo Travel Assistant, presenting to \
             potential investors.\n\n{position}\n\nSLIDE MAPPING:\n{mapping}\n\
             Relevant context from the pitch deck and company documents:\n{context}\n\n\
             IMPORTANT:\n\
             - Use all information in the context, even if it is in another language. Present it naturally in English.\n\
             - Read out the complete content of the current slide: titles, bullet points and key data.\n\
             - Format slide titles as **HEADING** and bullet points as **Label:** text.\n\n\
             PRESENTATION FLOW:\n\
             - After explaining the slide, include [NEXT_SLIDE] to move forward.\n\
             - To jump to a specific slide, include [GOTO_SLIDE:X] where X is the slide number."
        ),
        (Language::En, PromptMode::Question) => format!(
            "You are NoVo, an AI presentation assistant for NoVo Travel Assistant. A potential \
             investor has interrupted the presentation with a question.\n\n{position}\n\n\
             SLIDE MAPPING:\n{mapping}\n\
             Relevant context from the pitch deck and company documents:\n{context}\n\n\
             GUIDELINES:\n\
             - Answer clearly and briefly (2-4 sentences), in English, using the context above.\n\
             - Do not continue the presentation yourself; it resumes automatically.\n\
             - Only if the investor asks to see a particular slide, include [GOTO_SLIDE:X]."
        ),
        (Language::Pt, PromptMode::Presenting) => format!(
            "Você é a NoVo, uma assistente de apresentação de IA do NoVo Travel Assistant, \
             apresentando para potenciais investidores.\n\n{position}\n\n\
             MAPA DE SLIDES:\n{mapping}\n\
             Contexto relevante do pitch deck e documentos da empresa:\n{context}\n\n\
             IMPORTANTE:\n\
             - Use todas as informações do contexto, mesmo que estejam em outro idioma. Apresente naturalmente em Português.\n\
             - Leia o conteúdo completo do slide atual: títulos, pontos e dados principais.\n\
             - Formate títulos como **TÍTULO** e pontos como **Rótulo:** texto.\n\n\
             FLUXO DA APRESENTAÇÃO:\n\
             - Depois de explicar o slide, inclua [NEXT_SLIDE] para avançar.\n\
             - Para ir a um slide específico, inclua [GOTO_SLIDE:X] onde X é o número do slide."
        ),
        (Language::Pt, PromptMode::Question) => format!(
            "Você é a NoVo, uma assistente de apresentação de IA do NoVo Travel Assistant. Um \
             potencial investidor interrompeu a apresentação com uma pergunta.\n\n{position}\n\n\
             MAPA DE SLIDES:\n{mapping}\n\
             Contexto relevante do pitch deck e documentos da empresa:\n{context}\n\n\
             DIRETRIZES:\n\
             - Responda de forma clara e breve (2-4 frases), em Português, usando o contexto acima.\n\
             - Não continue a apresentação; ela será retomada automaticamente.\n\
             - Somente se o investidor pedir para ver um slide específico, inclua [GOTO_SLIDE:X]."
        ),
    }
}

/// `Current date and time: ...` line for the voice assistant
#[must_use]
pub fn time_info(now: DateTime<Utc>) -> String {
    format!(
        "Current date and time: {}",
        now.format("%A, %-d %B %Y, %H:%M UTC")
    )
}

/// Top three prosody scores rendered as `emotion: NN%`
#[must_use]
pub fn emotion_summary(scores: &[(String, f64)]) -> String {
    let mut ranked: Vec<&(String, f64)> = scores.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .take(3)
        .map(|(emotion, score)| format!("{emotion}: {:.0}%", score * 100.0))
        .collect::<Vec<_>>()
        .join(", ")
}

/// System prompt for the streamed voice Q&A
#[must_use]
pub fn clm_system_prompt(now: DateTime<Utc>, emotions: &str, context: &str) -> String {
    let emotions = if emotions.is_empty() {
        String::new()
    } else {
        format!("User's detected emotions: {emotions}")
    };
    let context = if context.trim().is_empty() {
        "No specific context retrieved. Answer from your knowledge of NoVo as an AI travel \
         assistant startup seeking investment."
    } else {
        context
    };

    format!(
        "You are NoVo, an emotionally intelligent AI assistant for NoVo Travel Assistant, an \
         AI-powered travel companion startup.\n\n\
         You have just presented an investor pitch deck and are now in a Q&A session. Be warm, \
         engaging and helpful.\n\n{}\n\n{emotions}\n\n\
         PRESENTATION CONTEXT (from pitch deck):\n{context}\n\n\
         KEY FACTS ABOUT NOVO:\n{KEY_FACTS}\n\n\
         RESPONSE GUIDELINES:\n\
         - Keep responses conversational and concise (2-4 sentences for simple questions).\n\
         - Match the user's emotional tone.\n\
         - For investment questions, be transparent and helpful.",
        time_info(now)
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::narration::NarrationStore;

    #[test]
    fn test_prompt_mentions_position_and_context() {
        let store = NarrationStore::embedded().unwrap();
        let deck = store.deck(Language::En).unwrap();

        let cover = system_prompt(deck, 0, "CTX", PromptMode::Presenting);
        assert!(cover.contains("COVER SLIDE"));
        assert!(cover.contains("CTX"));
        assert!(cover.contains("- Slide 0: Welcome"));

        let question = system_prompt(deck, 4, "", PromptMode::Question);
        assert!(question.contains("SLIDE 4 of 11"));
        assert!(!question.contains("include [NEXT_SLIDE]"));
    }

    #[test]
    fn test_portuguese_prompt() {
        let store = NarrationStore::embedded().unwrap();
        let deck = store.deck(Language::Pt).unwrap();
        assert!(system_prompt(deck, 2, "", PromptMode::Presenting).contains("Português"));
    }

    #[test]
    fn test_emotion_summary_top_three() {
        let scores = vec![
            ("calmness".to_string(), 0.12),
            ("interest".to_string(), 0.61),
            ("joy".to_string(), 0.31),
            ("doubt".to_string(), 0.2),
        ];
        assert_eq!(emotion_summary(&scores), "interest: 61%, joy: 31%, doubt: 20%");
        assert_eq!(emotion_summary(&[]), "");
    }

    #[test]
    fn test_time_info() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 5, 0).unwrap();
        assert_eq!(
            time_info(now),
            "Current date and time: Monday, 19 October 2026, 09:05 UTC"
        );
    }
}
