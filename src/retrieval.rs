//! Context retrieval over the hosted vector index
//!
//! Questions are matched against indexed slide text and company documents.
//! Two queries run side by side: one restricted to the visitor's language
//! and one across every language. The results are merged, de-duplicated by
//! passage id and capped. Retrieval never fails the caller; an unreachable
//! index simply yields no context.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::narration::{Language, NarrationStore};
use crate::{Error, Result};

/// Results requested from the same-language query
pub const SAME_LANGUAGE_TOP_K: usize = 5;

/// Results requested from the all-language query
pub const ANY_LANGUAGE_TOP_K: usize = 3;

/// Upper bound on passages handed to the answer generator
pub const MAX_PASSAGES: usize = 8;

/// Default chunk size for indexed documents
pub const CHUNK_CHARS: usize = 500;

/// A retrieved text passage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub language: Option<String>,
    pub score: f32,
}

/// A record written to the index
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    pub id: String,
    pub data: String,
    pub metadata: serde_json::Value,
}

/// Hosted vector index
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Nearest passages to `text`, optionally restricted to one language
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        language: Option<Language>,
    ) -> Result<Vec<Passage>>;

    /// Insert or replace records
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;
}

/// Retrieves context passages for a question
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Relevant passages, or an empty list when nothing could be retrieved
    async fn retrieve(&self, query: &str, language: Language) -> Vec<Passage>;
}

/// Upstash Vector REST client
///
/// Uses the hosted embedding endpoints (`query-data` / `upsert-data`), so raw
/// text goes in and the index computes the embeddings.
pub struct UpstashVector {
    client: reqwest::Client,
    url: String,
    token: SecretString,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<PassageMetadata>,
}

#[derive(Deserialize)]
struct PassageMetadata {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

impl UpstashVector {
    #[must_use]
    pub fn new(url: &str, token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl VectorIndex for UpstashVector {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        language: Option<Language>,
    ) -> Result<Vec<Passage>> {
        let mut body = serde_json::json!({
            "data": text,
            "topK": top_k,
            "includeMetadata": true,
        });
        if let Some(language) = language {
            body["filter"] = serde_json::Value::String(format!("language = '{language}'"));
        }

        let response = self
            .client
            .post(format!("{}/query-data", self.url))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Retrieval(format!("vector query failed {status}: {body}")));
        }

        let parsed: QueryResponse = response.json().await?;
        Ok(parsed
            .result
            .into_iter()
            .filter_map(|m| {
                let metadata = m.metadata?;
                let text = metadata.text.filter(|t| !t.trim().is_empty())?;
                Some(Passage {
                    id: m.id,
                    text,
                    language: metadata.language,
                    score: m.score,
                })
            })
            .collect())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(format!("{}/upsert-data", self.url))
            .bearer_auth(self.token.expose_secret())
            .json(records)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Retrieval(format!("vector upsert failed {status}: {body}")));
        }

        Ok(())
    }
}

/// Language-biased retriever on top of a [`VectorIndex`]
pub struct KnowledgeRetriever {
    index: Arc<dyn VectorIndex>,
}

impl KnowledgeRetriever {
    #[must_use]
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl ContextRetriever for KnowledgeRetriever {
    async fn retrieve(&self, query: &str, language: Language) -> Vec<Passage> {
        let (same, any) = tokio::join!(
            self.index.query(query, SAME_LANGUAGE_TOP_K, Some(language)),
            self.index.query(query, ANY_LANGUAGE_TOP_K, None),
        );

        let same = same.unwrap_or_else(|e| {
            tracing::warn!(error = %e, %language, "same-language retrieval failed");
            Vec::new()
        });
        let any = any.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cross-language retrieval failed");
            Vec::new()
        });

        let merged = merge_passages(same, any, MAX_PASSAGES);
        tracing::debug!(passages = merged.len(), %language, "retrieved context");
        merged
    }
}

/// Merge two ranked lists, keeping `primary` first and dropping repeated ids
#[must_use]
pub fn merge_passages(primary: Vec<Passage>, secondary: Vec<Passage>, cap: usize) -> Vec<Passage> {
    let mut seen = HashSet::new();
    primary
        .into_iter()
        .chain(secondary)
        .filter(|p| seen.insert(p.id.clone()))
        .take(cap)
        .collect()
}

/// Join passages into the context block given to the model
#[must_use]
pub fn context_block(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split text into chunks of at most roughly `max_chars`, on sentence ends
#[must_use]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        if !current.is_empty() && current.len() + sentence.len() > max_chars {
            chunks.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(sentence);
        current.push_str(". ");
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Index every narrated slide under `{lang}-slide-{n}`
///
/// # Errors
///
/// Returns error if the upsert fails
pub async fn index_narrations(index: &dyn VectorIndex, store: &NarrationStore) -> Result<usize> {
    let mut records = Vec::new();
    for deck in store.decks() {
        for slide in deck.slides() {
            let text = format!("{}\n{}", slide.title, slide.spoken_text);
            records.push(VectorRecord {
                id: format!("{}-slide-{}", deck.language(), slide.index),
                data: text.clone(),
                metadata: serde_json::json!({
                    "text": text,
                    "language": deck.language().code(),
                    "slideNumber": slide.index,
                    "source": "pitch_deck",
                }),
            });
        }
    }

    index.upsert(&records).await?;
    tracing::info!(records = records.len(), "indexed narration slides");
    Ok(records.len())
}

/// Index a plain-text document into every language namespace
///
/// # Errors
///
/// Returns error if the upsert fails
pub async fn index_document(index: &dyn VectorIndex, name: &str, text: &str) -> Result<usize> {
    let chunks = chunk_text(text, CHUNK_CHARS);
    let records: Vec<VectorRecord> = Language::ALL
        .iter()
        .flat_map(|language| {
            chunks.iter().enumerate().map(move |(i, chunk)| VectorRecord {
                id: format!("{language}-doc-{name}-{i}"),
                data: chunk.clone(),
                metadata: serde_json::json!({
                    "text": chunk,
                    "language": language.code(),
                    "source": "company_docs",
                    "filename": name,
                    "chunkIndex": i,
                }),
            })
        })
        .collect();

    index.upsert(&records).await?;
    tracing::info!(document = name, chunks = chunks.len(), "indexed document");
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(id: &str) -> Passage {
        Passage {
            id: id.to_string(),
            text: format!("text {id}"),
            language: None,
            score: 0.5,
        }
    }

    #[test]
    fn test_merge_dedupes_and_caps() {
        let primary = vec![passage("a"), passage("b")];
        let secondary = vec![passage("b"), passage("c"), passage("d")];

        let merged = merge_passages(primary, secondary, 3);
        let ids: Vec<&str> = merged.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_context_block() {
        let block = context_block(&[passage("a"), passage("b")]);
        assert_eq!(block, "text a\n\ntext b");
        assert_eq!(context_block(&[]), "");
    }

    #[test]
    fn test_chunk_text() {
        let text = "First sentence. Second one! Third? ".repeat(20);
        let chunks = chunk_text(&text, 100);

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 120));
        assert!(chunks[0].starts_with("First sentence."));
        assert!(chunk_text("   ", 100).is_empty());
    }

    #[test]
    fn test_query_response_skips_textless_matches() {
        let parsed: QueryResponse = serde_json::from_str(
            r#"{"result":[{"id":"en-slide-1","score":0.8,"metadata":{"text":"SEIS","language":"en"}},{"id":"x","score":0.1}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.result.len(), 2);
        assert!(parsed.result[1].metadata.is_none());
    }
}
