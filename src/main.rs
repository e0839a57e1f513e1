use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use lead_assist::analysis::{DEFAULT_CONCURRENCY, LeadAnalyzer};
use lead_assist::channels::{PapercupsReplySink, WebhookState, run_repl, webhook_routes};
use lead_assist::config::{AssistantConfig, EmbeddingConfig, IndexConfig, ServerConfig, parse_env};
use lead_assist::lead::{DialogueConfig, LeadDialogue, LeadExtractor};
use lead_assist::llm::{LlmConfig, RetryConfig, create_provider};
use lead_assist::orchestrator::{Orchestrator, OrchestratorDeps, spawn_pruning_task};
use lead_assist::retrieval::{OpenAiEmbedder, PineconeIndex, RetrievalConfig, RetrievalEngine};
use lead_assist::store::{LeadStore, LibSqlBackend};

const USAGE: &str = "usage: lead-assist [serve | chat | analyze [--all]]";

/// Session pruning cadence.
const PRUNE_EVERY: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "serve".to_string());
    match command.as_str() {
        "serve" => serve().await,
        "chat" => chat().await,
        "analyze" => analyze(!args.any(|a| a == "--all")).await,
        "-h" | "--help" | "help" => {
            eprintln!("{USAGE}");
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

/// Log to stderr, plus a daily file under `LEAD_ASSIST_LOG_DIR` when set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var("LEAD_ASSIST_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "lead-assist.log");
            let (file, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr.and(file))
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn open_store() -> anyhow::Result<Arc<LibSqlBackend>> {
    let db_path = std::env::var("LEAD_ASSIST_DB_PATH")
        .unwrap_or_else(|_| "./data/lead-assist.db".to_string());
    let store = LibSqlBackend::new_local(Path::new(&db_path))
        .await
        .with_context(|| format!("Failed to open database at {db_path}"))?;
    eprintln!("   Database: {db_path}");
    Ok(Arc::new(store))
}

/// Everything a conversation needs, wired from the environment.
async fn build_orchestrator() -> anyhow::Result<Orchestrator> {
    let assistant = AssistantConfig::from_env()?;
    let llm_config = LlmConfig::from_env()?;
    let retry = RetryConfig::from_env()?;

    eprintln!("🤖 Lead Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Lead fields: {}", assistant.lead_schema.names().collect::<Vec<_>>().join(", "));

    let llm = create_provider(&llm_config)?;
    let embedder = Arc::new(OpenAiEmbedder::new(EmbeddingConfig::from_env()?)?);
    let index = Arc::new(PineconeIndex::new(IndexConfig::from_env()?)?);
    let retrieval = RetrievalEngine::new(
        Arc::clone(&llm),
        embedder,
        index,
        RetrievalConfig::from_assistant(&assistant),
        retry.clone(),
    );
    let dialogue = LeadDialogue::new(
        Arc::clone(&llm),
        DialogueConfig::from_assistant(&assistant),
        retry.clone(),
    );
    let extractor = LeadExtractor::new(Arc::clone(&llm), assistant.lead_schema.clone(), retry.clone());
    let store: Arc<dyn LeadStore> = open_store().await?;

    let deps = OrchestratorDeps {
        llm,
        retrieval: Arc::new(retrieval),
        dialogue: Arc::new(dialogue),
        extractor: Arc::new(extractor),
        store: Some(store),
    };
    Ok(Orchestrator::new(assistant, deps, retry, None))
}

async fn serve() -> anyhow::Result<()> {
    let server = ServerConfig::from_env()?;
    let orchestrator = Arc::new(build_orchestrator().await?);

    let idle_timeout = orchestrator.config().session_idle_timeout;
    let _prune_handle =
        spawn_pruning_task(Arc::clone(orchestrator.sessions()), PRUNE_EVERY, idle_timeout);

    if server.reply_token.is_none() {
        eprintln!("   Warning: PAPERCUPS_API_KEY not set, replies cannot be delivered");
    }
    let state = WebhookState {
        orchestrator,
        replies: Arc::new(PapercupsReplySink::from_config(&server)?),
    };
    let app = webhook_routes(state, &server.allowed_origins);

    eprintln!("   Webhook: http://0.0.0.0:{}/chat", server.port);
    eprintln!("   CORS origins: {}\n", server.allowed_origins.join(", "));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("Failed to bind port {}", server.port))?;
    tracing::info!(port = server.port, "Webhook server started");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn chat() -> anyhow::Result<()> {
    let orchestrator = build_orchestrator().await?;
    eprintln!("   Type a message and press Enter. quit to exit.\n");
    let conversation_id = format!("cli-{}", uuid::Uuid::new_v4());
    run_repl(&orchestrator, &conversation_id).await?;
    Ok(())
}

async fn analyze(only_missing: bool) -> anyhow::Result<()> {
    let assistant = AssistantConfig::from_env()?;
    let llm = create_provider(&LlmConfig::from_env()?)?;
    let extractor = LeadExtractor::new(llm, assistant.lead_schema, RetryConfig::from_env()?);
    let store: Arc<dyn LeadStore> = open_store().await?;

    let concurrency = parse_env("LEAD_ASSIST_ANALYSIS_CONCURRENCY", DEFAULT_CONCURRENCY)?;
    let report = LeadAnalyzer::new(store, Arc::new(extractor))
        .with_concurrency(concurrency)
        .run(only_missing)
        .await?;
    eprintln!(
        "Analyzed {} conversations: {} leads extracted, {} failed, {} skipped",
        report.processed, report.extracted, report.failed, report.skipped
    );
    Ok(())
}
