//! Voice processing module
//!
//! Speech synthesis for narration and answers, live transcription of the
//! visitor's microphone, and wake word matching on the transcripts.

mod stt;
mod tts;
mod wake_word;

pub use stt::{LiveOptions, LiveTranscription, SpeechToText, TranscriptEvent, parse_live_message};
pub use tts::{AudioRef, SpeechSynthesizer, TextToSpeech};
pub use wake_word::WakeWord;
