//! Narration store
//!
//! Static, language-keyed slide scripts. Each slide carries the text that is
//! spoken aloud and the formatted text shown next to the slide image. The
//! scripts ship inside the binary as TOML assets and are parsed once at
//! startup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const EN_NARRATION: &str = include_str!("../assets/narrations/en.toml");
const PT_NARRATION: &str = include_str!("../assets/narrations/pt.toml");

/// Presentation language
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Pt,
}

impl Language {
    /// Every supported language
    pub const ALL: [Self; 2] = [Self::En, Self::Pt];

    /// Short language tag used in URLs, filters and store keys
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Pt => "pt",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "pt" => Ok(Self::Pt),
            other => Err(Error::Language(other.to_string())),
        }
    }
}

/// A single narrated slide
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub index: usize,
    pub language: Language,
    pub title: String,
    pub spoken_text: String,
    pub display_text: String,
    /// Display text split into the blocks that get highlighted while the
    /// narration plays
    pub sections: Vec<String>,
}

/// All slides for one language, plus the fixed lines spoken around them
#[derive(Debug, Clone)]
pub struct Deck {
    language: Language,
    greeting: String,
    finished: String,
    apology: String,
    slides: Vec<Slide>,
}

#[derive(Deserialize)]
struct NarrationFile {
    greeting: String,
    finished: String,
    apology: String,
    slides: Vec<SlideEntry>,
}

#[derive(Deserialize)]
struct SlideEntry {
    title: String,
    spoken: String,
    display: String,
}

impl Deck {
    /// Parse a deck from its TOML narration file
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or contains no slides
    pub fn from_toml(language: Language, source: &str) -> Result<Self> {
        let file: NarrationFile = toml::from_str(source)?;
        if file.slides.is_empty() {
            return Err(Error::Narration(format!("no slides for language {language}")));
        }

        let slides = file
            .slides
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let display_text = entry.display.trim().to_string();
                Slide {
                    index,
                    language,
                    title: entry.title,
                    spoken_text: entry.spoken.trim().to_string(),
                    sections: split_sections(&display_text),
                    display_text,
                }
            })
            .collect();

        Ok(Self {
            language,
            greeting: file.greeting,
            finished: file.finished,
            apology: file.apology,
            slides,
        })
    }

    #[must_use]
    pub const fn language(&self) -> Language {
        self.language
    }

    #[must_use]
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    #[must_use]
    pub fn slide(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Index of the final slide
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.slides.len().saturating_sub(1)
    }

    /// Clamp an arbitrary (possibly negative) slide number into the deck
    #[must_use]
    pub fn clamp(&self, index: i64) -> usize {
        let last = self.last_index();
        usize::try_from(index.max(0)).map_or(last, |i| i.min(last))
    }

    /// Greeting spoken when a visitor asks the assistant to introduce itself
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Message shown once the last slide has been narrated
    #[must_use]
    pub fn finished_message(&self) -> &str {
        &self.finished
    }

    /// Generic apology shown when a question could not be answered
    #[must_use]
    pub fn apology(&self) -> &str {
        &self.apology
    }
}

/// Language-keyed table of decks
#[derive(Debug, Clone)]
pub struct NarrationStore {
    decks: HashMap<Language, Deck>,
}

impl NarrationStore {
    /// Load the narration scripts compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if an embedded script fails to parse
    pub fn embedded() -> Result<Self> {
        let decks = [
            Deck::from_toml(Language::En, EN_NARRATION)?,
            Deck::from_toml(Language::Pt, PT_NARRATION)?,
        ];
        Ok(Self::from_decks(decks))
    }

    /// Build a store from explicit decks (one per language)
    #[must_use]
    pub fn from_decks(decks: impl IntoIterator<Item = Deck>) -> Self {
        Self {
            decks: decks.into_iter().map(|d| (d.language, d)).collect(),
        }
    }

    /// Deck for a language
    ///
    /// # Errors
    ///
    /// Returns error if the store has no deck for that language
    pub fn deck(&self, language: Language) -> Result<&Deck> {
        self.decks
            .get(&language)
            .ok_or_else(|| Error::Narration(format!("no deck for language {language}")))
    }

    /// Narration for one slide, if it exists
    #[must_use]
    pub fn narration(&self, language: Language, index: usize) -> Option<&Slide> {
        self.decks.get(&language).and_then(|d| d.slide(index))
    }

    /// Iterate all decks
    pub fn decks(&self) -> impl Iterator<Item = &Deck> {
        self.decks.values()
    }
}

/// Split display text into highlightable sections
///
/// Paragraphs are separated by blank lines. Inside a paragraph every bullet
/// line is its own section; the remaining lines are kept together.
fn split_sections(display: &str) -> Vec<String> {
    let mut sections = Vec::new();

    for block in display.split("\n\n") {
        let mut prose: Vec<&str> = Vec::new();
        for line in block.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if is_bullet(line) {
                if !prose.is_empty() {
                    sections.push(prose.join("\n"));
                    prose.clear();
                }
                sections.push(line.to_string());
            } else {
                prose.push(line);
            }
        }
        if !prose.is_empty() {
            sections.push(prose.join("\n"));
        }
    }

    sections
}

fn is_bullet(line: &str) -> bool {
    line.starts_with('•') || line.starts_with("- ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_DECK: &str = r#"
greeting = "hi"
finished = "done"
apology = "sorry"

[[slides]]
title = "One"
spoken = "first"
display = """
**One**
Intro line

• a
• b
"""

[[slides]]
title = "Two"
spoken = "second"
display = "**Two**"
"#;

    #[test]
    fn test_embedded_decks_load() {
        let store = NarrationStore::embedded().unwrap();
        let en = store.deck(Language::En).unwrap();
        let pt = store.deck(Language::Pt).unwrap();

        assert_eq!(en.len(), 12);
        assert_eq!(pt.len(), 12);
        assert_eq!(en.slide(0).unwrap().title, "Welcome");
        assert!(en.slides().iter().all(|s| !s.spoken_text.is_empty()));
        assert!(pt.slides().iter().all(|s| !s.sections.is_empty()));
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert_eq!(" pt ".parse::<Language>().unwrap(), Language::Pt);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_sections_split_bullets() {
        let deck = Deck::from_toml(Language::En, SMALL_DECK).unwrap();
        let slide = deck.slide(0).unwrap();

        assert_eq!(
            slide.sections,
            vec!["**One**\nIntro line".to_string(), "• a".to_string(), "• b".to_string()]
        );
    }

    #[test]
    fn test_clamp() {
        let deck = Deck::from_toml(Language::En, SMALL_DECK).unwrap();
        assert_eq!(deck.clamp(-3), 0);
        assert_eq!(deck.clamp(1), 1);
        assert_eq!(deck.clamp(99), 1);
    }

    #[test]
    fn test_empty_deck_rejected() {
        let source = "greeting = \"a\"\nfinished = \"b\"\napology = \"c\"\nslides = []\n";
        assert!(Deck::from_toml(Language::En, source).is_err());
    }
}
