//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use deck_narrator::api::ApiServerBuilder;
use tower::ServiceExt;

mod common;
use common::{FakeSpeech, ScriptedModel, build_test_router, pipeline};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_requires_answer_model() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["narrations"]["status"], "ok");
    assert_eq!(json["checks"]["answers"]["status"], "unavailable");
}

#[tokio::test]
async fn test_ready_with_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::replying("ok"));
    let app = build_test_router(pipeline(Some(model), None), dir.path());

    let response = app.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["checks"]["speech"]["status"], "unavailable");
    assert_eq!(json["checks"]["retrieval"]["status"], "unavailable");
}

#[tokio::test]
async fn test_introduce_and_start() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::replying("unused"));
    let app = build_test_router(
        pipeline(Some(model.clone()), Some(Arc::new(FakeSpeech::default()))),
        dir.path(),
    );

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({
                "message": "introduce_and_start",
                "language": "en",
                "currentSlide": 5
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["nextSlide"], 0);
    assert!(!json["message"].as_str().unwrap().is_empty());
    assert!(
        json["audioUrl"]
            .as_str()
            .unwrap()
            .starts_with("data:audio/mpeg;base64,")
    );
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_chat_follows_next_directive() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::replying("Let's look at the team. [NEXT_SLIDE]"));
    let app = build_test_router(pipeline(Some(model), None), dir.path());

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({
                "message": "Who is behind this?",
                "language": "en",
                "currentSlide": 3,
                "sessionId": "s1"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["message"], "Let's look at the team.");
    assert_eq!(json["nextSlide"], 4);
    assert_eq!(json["audioUrl"], "");
}

#[tokio::test]
async fn test_question_keeps_current_slide() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::replying("See the roadmap. [GOTO_SLIDE:9]"));
    let app = build_test_router(pipeline(Some(model), None), dir.path());

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({
                "message": "When do you launch?",
                "language": "en",
                "currentSlide": 2,
                "isQuestion": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["message"], "See the roadmap.");
    assert_eq!(json["nextSlide"], 2);
}

#[tokio::test]
async fn test_text_only_speaks_message() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::replying("unused"));
    let app = build_test_router(
        pipeline(Some(model.clone()), Some(Arc::new(FakeSpeech::default()))),
        dir.path(),
    );

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({
                "message": "Olá a todos",
                "language": "pt",
                "currentSlide": 1,
                "textOnly": true
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["message"], "Olá a todos");
    assert_eq!(json["nextSlide"], 1);
    assert!(!json["audioUrl"].as_str().unwrap().is_empty());
    assert_eq!(model.call_count(), 0);
}

#[tokio::test]
async fn test_chat_without_model_fails() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({"message": "Hi", "language": "en", "currentSlide": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Failed to process message");
    assert!(json["details"].is_string());
}

#[tokio::test]
async fn test_chat_generation_failure() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::failing());
    let app = build_test_router(pipeline(Some(model), None), dir.path());

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({"message": "Hi", "language": "en", "currentSlide": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_chat_rejects_unknown_language() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app
        .oneshot(post_json(
            "/api/chat",
            &serde_json::json!({"message": "Bonjour", "language": "fr", "currentSlide": 0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_slides_unknown_language_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app.oneshot(get("/api/slides?language=fr")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json, serde_json::json!({"slides": []}));
}

#[tokio::test]
async fn test_slides_sorted_by_number() {
    let dir = tempfile::tempdir().unwrap();
    let pt = dir.path().join("pt");
    std::fs::create_dir(&pt).unwrap();
    for name in ["Slide 12.png", "Slide 3.png", "Slide 1.jpeg", "thumbs.db"] {
        std::fs::write(pt.join(name), b"img").unwrap();
    }
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/slides?language=pt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(
        json["slides"],
        serde_json::json!([
            "/slides/pt/Slide 1.jpeg",
            "/slides/pt/Slide 3.png",
            "/slides/pt/Slide 12.png"
        ])
    );

    // the images themselves are served
    let response = app.oneshot(get("/slides/pt/Slide%203.png")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tokens_unconfigured() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app
        .clone()
        .oneshot(get("/api/deepgram-token"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Deepgram"));

    let response = app.oneshot(get("/api/hume-token")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_hume_clm_requires_bearer() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_router(pipeline(None, None), dir.path());

    let response = app
        .oneshot(post_json(
            "/api/hume-clm",
            &serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_hume_clm_streams_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::replying("We raise sixty five thousand."));
    let app = ApiServerBuilder::new(Arc::new(pipeline(None, None)))
        .slides_dir(dir.path().to_path_buf())
        .language_model(model)
        .build()
        .router();

    let request = Request::builder()
        .method("POST")
        .uri("/api/hume-clm?custom_session_id=abc&language=en")
        .header("content-type", "application/json")
        .header("authorization", "Bearer from-hume")
        .body(Body::from(
            serde_json::json!({
                "messages": [{
                    "role": "user",
                    "content": "How much are you raising?",
                    "models": {"prosody": {"scores": {"Interest": 0.7}}}
                }]
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();

    let chunks: Vec<serde_json::Value> = body
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .filter(|d| *d != "[DONE]")
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();

    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, "We raise sixty five thousand.");

    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(last["system_fingerprint"], "abc");
    assert_eq!(last["object"], "chat.completion.chunk");
    assert!(body.trim_end().ends_with("data: [DONE]"));
}
