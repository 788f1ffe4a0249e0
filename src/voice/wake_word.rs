//! Wake word detection
//!
//! Matches the wake word inside live transcript text and extracts whatever
//! the speaker said after it.

/// Transcript-level wake word matcher
#[derive(Debug, Clone)]
pub struct WakeWord {
    word: String,
}

impl WakeWord {
    /// Create a matcher for `word` (case-insensitive)
    #[must_use]
    pub fn new(word: &str) -> Self {
        let word = word.trim().to_lowercase();
        tracing::debug!(wake_word = %word, "wake word matcher initialized");
        Self { word }
    }

    /// Text spoken after the wake word, if the wake word is present
    ///
    /// Leading punctuation and whitespace are dropped, so
    /// `"Novo, what is SEIS?"` yields `"what is SEIS?"`.
    #[must_use]
    pub fn extract_command(&self, transcript: &str) -> Option<String> {
        self.find(transcript).map(|end| {
            transcript[end..]
                .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
                .trim_end()
                .to_string()
        })
    }

    /// Byte offset just past the first occurrence of the wake word
    fn find(&self, transcript: &str) -> Option<usize> {
        if self.word.is_empty() {
            return None;
        }
        let len = self.word.len();
        transcript.char_indices().find_map(|(i, _)| {
            transcript
                .get(i..i + len)
                .filter(|candidate| candidate.to_lowercase() == self.word)
                .map(|_| i + len)
        })
    }
}
