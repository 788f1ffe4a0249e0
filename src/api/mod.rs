//! HTTP API server for the deck narrator

pub mod chat;
pub mod clm;
pub mod health;
pub mod presentation;
pub mod rate_limit;
pub mod slides;
pub mod tokens;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::answer::LanguageModel;
use crate::chat::ChatPipeline;
use crate::config::{Config, PresenterConfig};
use crate::retrieval::ContextRetriever;
use crate::Result;

/// Shared state for API handlers
pub struct ApiState {
    pub pipeline: Arc<ChatPipeline>,
    /// Model used for the streamed voice endpoint
    pub llm: Option<Arc<dyn LanguageModel>>,
    pub retriever: Option<Arc<dyn ContextRetriever>>,
    pub clm_max_tokens: u32,
    pub deepgram_key: Option<SecretString>,
    pub hume_key: Option<SecretString>,
    pub hume_secret: Option<SecretString>,
    pub hume_clm_secret: Option<SecretString>,
    pub stt_model: String,
    pub slides_dir: PathBuf,
    pub presenter: PresenterConfig,
    pub http: reqwest::Client,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
}

/// Builder for the API server
pub struct ApiServerBuilder {
    pipeline: Arc<ChatPipeline>,
    port: u16,
    static_dir: Option<PathBuf>,
    slides_dir: PathBuf,
    llm: Option<Arc<dyn LanguageModel>>,
    retriever: Option<Arc<dyn ContextRetriever>>,
    clm_max_tokens: u32,
    deepgram_key: Option<SecretString>,
    hume_key: Option<SecretString>,
    hume_secret: Option<SecretString>,
    hume_clm_secret: Option<SecretString>,
    stt_model: String,
    presenter: PresenterConfig,
    rate_limit: Option<u32>,
}

impl ApiServerBuilder {
    /// Create a builder around the chat pipeline with default settings
    #[must_use]
    pub fn new(pipeline: Arc<ChatPipeline>) -> Self {
        Self {
            pipeline,
            port: 3000,
            static_dir: None,
            slides_dir: PathBuf::from("public/slides"),
            llm: None,
            retriever: None,
            clm_max_tokens: 512,
            deepgram_key: None,
            hume_key: None,
            hume_secret: None,
            hume_clm_secret: None,
            stt_model: "nova-2".to_string(),
            presenter: PresenterConfig::default(),
            rate_limit: None,
        }
    }

    /// Apply server, key and timing settings from the loaded configuration
    #[must_use]
    pub fn config(mut self, config: &Config) -> Self {
        self.port = config.server.port;
        self.static_dir.clone_from(&config.server.static_dir);
        self.slides_dir.clone_from(&config.server.slides_dir);
        self.rate_limit = config.server.rate_limit;
        self.clm_max_tokens = config.llm.clm_max_tokens;
        self.deepgram_key.clone_from(&config.api_keys.deepgram);
        self.hume_key.clone_from(&config.api_keys.hume);
        self.hume_secret.clone_from(&config.api_keys.hume_secret);
        self.hume_clm_secret.clone_from(&config.api_keys.hume_clm_secret);
        self.stt_model.clone_from(&config.voice.stt_model);
        self.presenter = config.presenter.clone();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn static_dir(mut self, dir: PathBuf) -> Self {
        self.static_dir = Some(dir);
        self
    }

    #[must_use]
    pub fn slides_dir(mut self, dir: PathBuf) -> Self {
        self.slides_dir = dir;
        self
    }

    /// Set the model behind the voice CLM endpoint
    #[must_use]
    pub fn language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    #[must_use]
    pub fn retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    #[must_use]
    pub fn deepgram_key(mut self, key: SecretString) -> Self {
        self.deepgram_key = Some(key);
        self
    }

    #[must_use]
    pub fn hume_keys(mut self, api_key: SecretString, secret_key: SecretString) -> Self {
        self.hume_key = Some(api_key);
        self.hume_secret = Some(secret_key);
        self
    }

    #[must_use]
    pub fn hume_clm_secret(mut self, secret: SecretString) -> Self {
        self.hume_clm_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn presenter_config(mut self, config: PresenterConfig) -> Self {
        self.presenter = config;
        self
    }

    /// Limit the whole API to `requests_per_minute`
    #[must_use]
    pub const fn rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit = Some(requests_per_minute);
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let rate_limiter = self.rate_limit.map(rate_limit::create_limiter);

        let state = Arc::new(ApiState {
            pipeline: self.pipeline,
            llm: self.llm,
            retriever: self.retriever,
            clm_max_tokens: self.clm_max_tokens,
            deepgram_key: self.deepgram_key,
            hume_key: self.hume_key,
            hume_secret: self.hume_secret,
            hume_clm_secret: self.hume_clm_secret,
            stt_model: self.stt_model,
            slides_dir: self.slides_dir,
            presenter: self.presenter,
            http: reqwest::Client::new(),
            rate_limiter,
        });

        ApiServer {
            state,
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let slides_files = ServeDir::new(&self.state.slides_dir);

        let mut router = Router::new()
            .merge(chat::router(self.state.clone()))
            .merge(slides::router(self.state.clone()))
            .merge(tokens::router(self.state.clone()))
            .merge(clm::router(self.state.clone()))
            .merge(presentation::router(self.state.clone()))
            .nest_service("/slides", slides_files)
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        // Serve the web client if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir = ServeDir::new(static_dir)
                .not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let router = router.layer(axum::middleware::from_fn_with_state(
            self.state.clone(),
            rate_limit::rate_limit_middleware,
        ));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.rate_limiter.is_some() {
            tracing::info!("rate limiting active");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
