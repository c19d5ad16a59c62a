//! Parley application binary - composition root.
//!
//! Ties together all Parley crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Build the enrichment gateway (local backends + LLM continuation)
//! 3. Build the retrieval gateway (web search + SQLite stored context)
//! 4. Choose the generation backend
//! 5. Read messages from stdin (or `--once`) and print each turn as JSON

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use parley_chat::{
    ChatError, ContextStore, ExtractiveGenerator, GenerationBackend, LlmEnrichmentBackend,
    OpenAiGenerator, OrchestratorConfig, ResponseOrchestrator,
};
use parley_core::config::ParleyConfig;
use parley_core::EnrichmentKind;
use parley_enrich::{register_local_backends, AnalysisCache, AnalysisService, EnrichmentGateway};
use parley_retrieval::{GoogleSearchBackend, RetrievalGateway, SqliteContextStore};

use cli::CliArgs;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Read a secret from the environment variable named in config.
fn secret(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|v| !v.trim().is_empty())
}

/// Pick the primary generator: the configured chat-completions endpoint when
/// a key is available, the extractive generator otherwise.
fn build_generator(config: &ParleyConfig) -> Arc<dyn GenerationBackend> {
    let generation = &config.generation;
    if generation.provider == "extractive" {
        tracing::info!("Using extractive generator");
        return Arc::new(ExtractiveGenerator::default());
    }
    match secret(&generation.api_key_env) {
        Some(key) => {
            tracing::info!(model = %generation.model, api_base = %generation.api_base, "Using chat-completions generator");
            Arc::new(OpenAiGenerator::new(generation, key))
        }
        None => {
            tracing::warn!(
                env = %generation.api_key_env,
                "No generation API key set; falling back to extractive generator"
            );
            Arc::new(ExtractiveGenerator::default())
        }
    }
}

fn build_enrichment(
    config: &ParleyConfig,
    generator: &Arc<dyn GenerationBackend>,
    llm_available: bool,
) -> EnrichmentGateway {
    let mut gateway = EnrichmentGateway::new(Duration::from_millis(config.enrichment.timeout_ms));
    register_local_backends(&mut gateway);
    if llm_available {
        let llm = Arc::new(LlmEnrichmentBackend::new(Arc::clone(generator)));
        for kind in LlmEnrichmentBackend::kinds() {
            gateway.register(kind, llm.clone());
        }
    }
    gateway
}

/// Drop configured kinds nothing is registered for, so an offline setup does
/// not report the same failure on every turn.
fn supported_kinds(
    gateway: &EnrichmentGateway,
    kinds: &[EnrichmentKind],
    side: &str,
) -> Vec<EnrichmentKind> {
    kinds
        .iter()
        .filter(|kind| {
            let supported = gateway.supports(kind);
            if !supported {
                tracing::warn!(kind = %kind, side, "No backend for enrichment kind; disabled");
            }
            supported
        })
        .cloned()
        .collect()
}

fn build_retrieval(
    config: &ParleyConfig,
    data_dir: &std::path::Path,
) -> Result<RetrievalGateway, Box<dyn std::error::Error>> {
    let mut gateway = RetrievalGateway::new(Duration::from_millis(config.retrieval.timeout_ms));

    let search = &config.search;
    if search.provider == "google" {
        match (secret(&search.api_key_env), secret(&search.engine_id_env)) {
            (Some(key), Some(engine_id)) => {
                gateway = gateway.with_search(Arc::new(GoogleSearchBackend::new(
                    search.endpoint.clone(),
                    key,
                    engine_id,
                )));
                tracing::info!("Web search enabled");
            }
            _ => tracing::warn!(
                key_env = %search.api_key_env,
                engine_env = %search.engine_id_env,
                "Search credentials not set; web search disabled"
            ),
        }
    }

    let db_path = data_dir.join(&config.retrieval.context_db);
    let store = SqliteContextStore::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Stored-context database opened");
    Ok(gateway.with_stored_context(Arc::new(store)))
}

async fn run_turn(
    orchestrator: &ResponseOrchestrator,
    session: &mut Option<Uuid>,
    text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match orchestrator.process_turn(*session, text).await {
        Ok(result) => {
            *session = Some(result.session_id);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e @ ChatError::InvariantViolation(_)) => Err(e.into()),
        Err(e) => {
            tracing::warn!(error = %e, "Message rejected");
            println!("{}", serde_json::json!({ "error": e.to_string() }));
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    // Generation first: the continuation and answer kinds share it.
    let generator = build_generator(&config);
    let llm_available = generator.name() != "extractive";

    let enrichment = build_enrichment(&config, &generator, llm_available);
    let mut orchestrator_config = OrchestratorConfig::from_config(&config);
    orchestrator_config.input_kinds =
        supported_kinds(&enrichment, &orchestrator_config.input_kinds, "input");
    orchestrator_config.output_kinds =
        supported_kinds(&enrichment, &orchestrator_config.output_kinds, "output");

    let analysis = Arc::new(AnalysisService::new(
        Arc::new(enrichment),
        AnalysisCache::new(config.enrichment.cache_capacity),
    ));
    let retrieval = Arc::new(build_retrieval(&config, &data_dir)?);
    let contexts = Arc::new(ContextStore::new(
        config.chat.history_capacity,
        config.chat.session_timeout_minutes,
    ));

    let orchestrator = ResponseOrchestrator::new(
        orchestrator_config,
        analysis,
        retrieval,
        generator,
        contexts,
    );

    let mut session = match args.session {
        Some(id) => Some(orchestrator.open_session(id)?.id()),
        None => None,
    };

    if let Some(text) = args.once.as_deref() {
        return run_turn(&orchestrator, &mut session, text).await;
    }

    tracing::info!("Reading messages from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        run_turn(&orchestrator, &mut session, &line).await?;
    }

    if let Some(id) = session {
        tracing::info!(session_id = %id, "Input closed");
    }
    Ok(())
}
