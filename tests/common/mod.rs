//! Shared test utilities

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deck_narrator::answer::{AnswerGenerator, LanguageModel, TextStream};
use deck_narrator::api::ApiServerBuilder;
use deck_narrator::chat::ChatPipeline;
use deck_narrator::retrieval::{ContextRetriever, Passage, VectorIndex, VectorRecord};
use deck_narrator::session::{ConversationTurn, MemoryHistory};
use deck_narrator::voice::{AudioRef, SpeechSynthesizer};
use deck_narrator::{Error, Language, NarrationStore, Result};

/// Synthesizer that "encodes" the text itself as audio
#[derive(Default)]
pub struct FakeSpeech {
    pub calls: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str, _language: Language) -> Result<AudioRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AudioRef::from_mp3(text.as_bytes()))
    }
}

/// Synthesizer that always fails
pub struct FailingSpeech;

#[async_trait]
impl SpeechSynthesizer for FailingSpeech {
    async fn synthesize(&self, _text: &str, _language: Language) -> Result<AudioRef> {
        Err(Error::Tts("provider down".to_string()))
    }
}

/// Model with a fixed reply, optional delay and optional failure
pub struct ScriptedModel {
    reply: String,
    delay: Option<Duration>,
    fail: bool,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::replying("")
        }
    }

    pub fn slow(reply: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::replying(reply)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::Llm("model unavailable".to_string()));
        }
        Ok(self.reply.clone())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[ConversationTurn],
        _max_tokens: u32,
    ) -> Result<String> {
        self.respond().await
    }

    async fn stream(
        &self,
        _system: &str,
        _messages: &[ConversationTurn],
        _max_tokens: u32,
    ) -> Result<TextStream> {
        let reply = self.respond().await?;
        let words: Vec<Result<String>> = reply
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(words)))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Retriever returning fixed passages
pub struct FixedRetriever {
    passages: Vec<Passage>,
    pub calls: AtomicUsize,
}

impl FixedRetriever {
    pub fn new(texts: &[&str]) -> Self {
        let passages = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Passage {
                id: format!("p{i}"),
                text: (*text).to_string(),
                language: Some("en".to_string()),
                score: 0.9,
            })
            .collect();
        Self {
            passages,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContextRetriever for FixedRetriever {
    async fn retrieve(&self, _query: &str, _language: Language) -> Vec<Passage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.passages.clone()
    }
}

/// Vector index whose language-filtered queries fail
pub struct FlakyIndex {
    pub unfiltered: Vec<Passage>,
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn query(
        &self,
        _text: &str,
        top_k: usize,
        language: Option<Language>,
    ) -> Result<Vec<Passage>> {
        match language {
            Some(_) => Err(Error::Retrieval("filtered query failed".to_string())),
            None => Ok(self.unfiltered.iter().take(top_k).cloned().collect()),
        }
    }

    async fn upsert(&self, _records: &[VectorRecord]) -> Result<()> {
        Ok(())
    }
}

/// Vector index that is entirely down
pub struct DownIndex;

#[async_trait]
impl VectorIndex for DownIndex {
    async fn query(
        &self,
        _text: &str,
        _top_k: usize,
        _language: Option<Language>,
    ) -> Result<Vec<Passage>> {
        Err(Error::Retrieval("connection refused".to_string()))
    }

    async fn upsert(&self, _records: &[VectorRecord]) -> Result<()> {
        Err(Error::Retrieval("connection refused".to_string()))
    }
}

/// Build a chat pipeline over the embedded narrations
pub fn pipeline(
    model: Option<Arc<dyn LanguageModel>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
) -> ChatPipeline {
    let narrations = Arc::new(NarrationStore::embedded().expect("embedded narrations"));
    let mut pipeline = ChatPipeline::new(narrations, Arc::new(MemoryHistory::new()));
    if let Some(model) = model {
        pipeline = pipeline.with_generator(Arc::new(AnswerGenerator::new(model, 1024, 10)));
    }
    if let Some(speech) = speech {
        pipeline = pipeline.with_speech(speech);
    }
    pipeline
}

/// Build a test API router
pub fn build_test_router(pipeline: ChatPipeline, slides_dir: &Path) -> axum::Router {
    ApiServerBuilder::new(Arc::new(pipeline))
        .slides_dir(slides_dir.to_path_buf())
        .build()
        .router()
}
