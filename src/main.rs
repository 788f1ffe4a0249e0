use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deck_narrator::answer::{AnswerGenerator, AnthropicClient, LanguageModel, PromptMode};
use deck_narrator::api::ApiServerBuilder;
use deck_narrator::chat::{ChatPipeline, DEFAULT_SESSION};
use deck_narrator::config::TtsProviderKind;
use deck_narrator::retrieval::{self, ContextRetriever, KnowledgeRetriever, UpstashVector};
use deck_narrator::session::{HistoryStore, MemoryHistory, UpstashHistory};
use deck_narrator::voice::{SpeechToText, TextToSpeech};
use deck_narrator::{Config, Language, NarrationStore};

/// Acting direction for Hume Octave narration
const HUME_VOICE_DESCRIPTION: &str =
    "A warm, confident startup founder presenting to investors, clear and engaging.";

/// Narrator - AI-narrated pitch deck presenter
#[derive(Parser)]
#[command(name = "narrator", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "NARRATOR_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Index slide narrations and company documents into the vector store
    Index {
        /// Directory of .txt/.md documents to index alongside the narrations
        #[arg(long)]
        docs: Option<PathBuf>,
    },
    /// Answer one question from the command line
    Ask {
        /// Question to ask
        question: String,
        /// Answer language (en, pt)
        #[arg(short, long, default_value = "en")]
        language: String,
        /// Slide the question is asked on
        #[arg(short, long, default_value = "0")]
        slide: usize,
    },
    /// Transcribe a recorded audio file
    Transcribe {
        /// Audio file (wav, mp3, webm, ogg)
        file: PathBuf,
        /// Spoken language (en, pt)
        #[arg(short, long, default_value = "en")]
        language: String,
    },
    /// Synthesize a line of speech and report the result
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,deck_narrator=info",
        1 => "info,deck_narrator=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Index { docs } => index(&config, docs.as_deref()).await,
        Command::Ask {
            question,
            language,
            slide,
        } => ask(&config, &question, &language, slide).await,
        Command::Transcribe { file, language } => transcribe(&config, &file, &language).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Service clients built once from configuration
struct Services {
    pipeline: Arc<ChatPipeline>,
    llm: Option<Arc<dyn LanguageModel>>,
    retriever: Option<Arc<dyn ContextRetriever>>,
}

fn vector_index(config: &Config) -> Option<Arc<UpstashVector>> {
    let (Some(url), Some(token)) = (&config.upstash.vector_url, &config.upstash.vector_token)
    else {
        return None;
    };
    Some(Arc::new(UpstashVector::new(url, token.clone())))
}

fn build_services(config: &Config) -> anyhow::Result<Services> {
    let narrations = Arc::new(NarrationStore::embedded()?);

    let history: Arc<dyn HistoryStore> =
        match (&config.upstash.redis_url, &config.upstash.redis_token) {
            (Some(url), Some(token)) => Arc::new(UpstashHistory::new(
                url,
                token.clone(),
                config.upstash.history_ttl,
            )),
            _ => {
                tracing::warn!("UPSTASH_REDIS_REST_URL/TOKEN not set, conversation history kept in memory");
                Arc::new(MemoryHistory::new())
            }
        };

    let mut pipeline = ChatPipeline::new(narrations, history);

    let retriever: Option<Arc<dyn ContextRetriever>> = match vector_index(config) {
        Some(index) => Some(Arc::new(KnowledgeRetriever::new(index))),
        None => {
            tracing::warn!("UPSTASH_VECTOR_REST_URL/TOKEN not set, answers will have no retrieved context");
            None
        }
    };
    if let Some(retriever) = &retriever {
        pipeline = pipeline.with_retriever(Arc::clone(retriever));
    }

    let llm: Option<Arc<dyn LanguageModel>> = match &config.api_keys.anthropic {
        Some(key) => Some(Arc::new(AnthropicClient::new(
            key.clone(),
            config.llm.model.clone(),
        )?)),
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set, questions cannot be answered");
            None
        }
    };
    if let Some(llm) = &llm {
        pipeline = pipeline.with_generator(Arc::new(AnswerGenerator::new(
            Arc::clone(llm),
            config.llm.max_tokens,
            config.llm.history_window,
        )));
    }

    match TextToSpeech::from_config(
        &config.voice,
        config.api_keys.elevenlabs.as_ref(),
        config.api_keys.hume.as_ref(),
    ) {
        Ok(tts) => {
            let tts = if tts.provider() == TtsProviderKind::Hume {
                tts.with_description(HUME_VOICE_DESCRIPTION)
            } else {
                tts
            };
            pipeline = pipeline.with_speech(Arc::new(tts));
        }
        Err(e) => tracing::warn!(error = %e, "speech synthesis disabled"),
    }

    Ok(Services {
        pipeline: Arc::new(pipeline),
        llm,
        retriever,
    })
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    tracing::info!(port = config.server.port, "starting deck narrator");

    let services = build_services(config)?;
    let mut builder = ApiServerBuilder::new(services.pipeline).config(config);
    if let Some(llm) = services.llm {
        builder = builder.language_model(llm);
    }
    if let Some(retriever) = services.retriever {
        builder = builder.retriever(retriever);
    }

    let server = builder.build().spawn();

    tokio::select! {
        result = server => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

async fn index(config: &Config, docs: Option<&Path>) -> anyhow::Result<()> {
    let index = vector_index(config)
        .ok_or_else(|| anyhow::anyhow!("UPSTASH_VECTOR_REST_URL and UPSTASH_VECTOR_REST_TOKEN must be set"))?;
    let narrations = NarrationStore::embedded()?;

    let slides = retrieval::index_narrations(index.as_ref(), &narrations).await?;
    println!("Indexed {slides} slide narrations");

    let Some(dir) = docs else {
        return Ok(());
    };

    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut chunks = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt") || e.eq_ignore_ascii_case("md"));
        if !is_text {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        let text = tokio::fs::read_to_string(&path).await?;
        let count = retrieval::index_document(index.as_ref(), name, &text).await?;
        println!("Indexed {name}: {count} chunks");
        chunks += count;
    }

    println!("Indexed {chunks} document chunks");
    Ok(())
}

async fn ask(config: &Config, question: &str, language: &str, slide: usize) -> anyhow::Result<()> {
    let language: Language = language.parse()?;
    let services = build_services(config)?;

    let spoken = services
        .pipeline
        .answer(question, language, slide, DEFAULT_SESSION, PromptMode::Question)
        .await?;

    println!("{}", spoken.answer.text);
    if let Some(directive) = spoken.answer.directive {
        println!("\n(directive: {directive:?})");
    }
    Ok(())
}

fn audio_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        _ => "audio/wav",
    }
}

async fn transcribe(config: &Config, file: &Path, language: &str) -> anyhow::Result<()> {
    let language: Language = language.parse()?;
    let key = config
        .api_keys
        .deepgram
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DEEPGRAM_API_KEY not set"))?;
    let stt = SpeechToText::new_deepgram(key, config.voice.stt_model.clone())?;

    let audio = tokio::fs::read(file).await?;
    let text = stt.transcribe(&audio, audio_mime(file), language).await?;

    if text.is_empty() {
        println!("(no speech detected)");
    } else {
        println!("{text}");
    }
    Ok(())
}

async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    let tts = TextToSpeech::from_config(
        &config.voice,
        config.api_keys.elevenlabs.as_ref(),
        config.api_keys.hume.as_ref(),
    )?;

    println!("Synthesizing with {:?}...", tts.provider());
    let audio = tts.synthesize_text(text).await?;

    if audio.is_empty() {
        println!("Provider returned no audio");
    } else {
        println!("Got audio URL of {} bytes", audio.as_str().len());
    }
    Ok(())
}
