//! Deck Narrator - AI-narrated pitch deck presenter
//!
//! This library provides the core functionality for the narrator service:
//! - Presentation controller (slide narration, wake-word interruptions)
//! - Retrieval-augmented answers with slide directives
//! - Hosted speech synthesis and live transcription adapters
//! - HTTP and WebSocket API for the browser client
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Browser client                      │
//! │   Slides  │  Audio playback  │  Microphone  │  Chat  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ HTTP / WebSocket
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Deck Narrator                       │
//! │  Presenter FSM  │  Chat pipeline  │  Narrations     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               Hosted services                        │
//! │  Anthropic │ ElevenLabs/Hume │ Deepgram │ Upstash    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod answer;
pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod narration;
pub mod presenter;
pub mod retrieval;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use narration::{Deck, Language, NarrationStore, Slide};
pub use presenter::{Effect, Event, PresentationState, Presenter};
