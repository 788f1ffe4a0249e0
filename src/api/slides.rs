//! Slide image listing

use std::path::Path;
use std::sync::{Arc, LazyLock};

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ApiState;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Build slides router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/slides", get(list).post(list))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SlidesQuery {
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlidesResponse {
    pub slides: Vec<String>,
}

async fn list(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SlidesQuery>,
) -> Json<SlidesResponse> {
    let language = query
        .language
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "en".to_string());

    let slides = slide_paths(&state.slides_dir, &language).await;
    Json(SlidesResponse { slides })
}

/// A language tag that is safe to use as a directory name
fn is_safe_language(language: &str) -> bool {
    !language.is_empty()
        && language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| ext.eq_ignore_ascii_case(i)))
}

/// First run of digits in a file name, or 0
fn slide_number(name: &str) -> u64 {
    FIRST_NUMBER
        .find(name)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Public paths of the slide images for `language`, in slide order
///
/// Anything unexpected (unsafe tag, missing directory, IO failure) yields an
/// empty list.
pub async fn slide_paths(slides_dir: &Path, language: &str) -> Vec<String> {
    if !is_safe_language(language) {
        tracing::debug!(language, "rejected slide language");
        return Vec::new();
    }

    let dir = slides_dir.join(language);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "no slides directory");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                if let Some(name) = entry.file_name().to_str()
                    && is_image(name)
                {
                    files.push(name.to_string());
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "failed to list slides");
                return Vec::new();
            }
        }
    }

    // Stable sort keeps directory order for equal numbers; names break ties
    files.sort();
    files.sort_by_key(|name| slide_number(name));

    files
        .into_iter()
        .map(|name| format!("/slides/{language}/{name}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_tag_safety() {
        assert!(is_safe_language("en"));
        assert!(is_safe_language("pt-BR"));
        assert!(!is_safe_language(""));
        assert!(!is_safe_language("../etc"));
        assert!(!is_safe_language("en/x"));
    }

    #[test]
    fn test_slide_number() {
        assert_eq!(slide_number("slide10.png"), 10);
        assert_eq!(slide_number("2-intro-3.jpg"), 2);
        assert_eq!(slide_number("cover.png"), 0);
    }

    #[tokio::test]
    async fn test_numeric_order_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let en = dir.path().join("en");
        std::fs::create_dir(&en).unwrap();
        for name in ["slide10.png", "slide2.JPG", "slide1.webp", "notes.txt"] {
            std::fs::write(en.join(name), b"x").unwrap();
        }

        let slides = slide_paths(dir.path(), "en").await;
        assert_eq!(
            slides,
            vec![
                "/slides/en/slide1.webp",
                "/slides/en/slide2.JPG",
                "/slides/en/slide10.png",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(slide_paths(dir.path(), "fr").await.is_empty());
        assert!(slide_paths(dir.path(), "..").await.is_empty());
    }
}
