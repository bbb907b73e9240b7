//! CLI subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use hrbot_core::answer::AnswerEngine;
use hrbot_core::channels::whatsapp::{RealWhatsAppHttp, WhatsAppSender};
use hrbot_core::config::{BotConfig, load_config};
use hrbot_core::embeddings::{Embedder, create_embedder};
use hrbot_core::escalation::{DisabledMailer, EscalationMailer, SmtpMailer};
use hrbot_core::gateway::{WebhookState, run_gateway};
use hrbot_core::interaction_log::SqliteInteractionLog;
use hrbot_core::providers::create_provider;
use hrbot_core::rag::{
    IngestReport, IngestionPipeline, PassageRetriever, PolicyCatalog, PolicyRouter,
    SqliteVectorStore, TextSplitter, VectorStore,
};
use hrbot_core::{
    AnswerSettings, Brain, ChatService, InMemoryConversationStore, SideEffectMonitor,
    ToolRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, config_path),
        Commands::Serve { port } => handle_serve(load(config_path)?, port).await,
        Commands::Ingest { rebuild } => handle_ingest(&load(config_path)?, rebuild).await,
        Commands::Ask { question } => handle_ask(&load(config_path)?, &question).await,
        Commands::InitDb => handle_init_db(&load(config_path)?).await,
        Commands::Catalog => handle_catalog(&load(config_path)?).await,
    }
}

fn load(config_path: Option<&Path>) -> anyhow::Result<BotConfig> {
    let config =
        load_config(config_path).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;
    Ok(config)
}

fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = Path::new("hrbot.toml");
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            std::fs::write(path, BotConfig::default().to_toml()?)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(config_path)?;
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn open_store(config: &BotConfig) -> anyhow::Result<Arc<SqliteVectorStore>> {
    let path = config.store.database_file();
    let store = SqliteVectorStore::open(&path, &config.store.collection)
        .await
        .with_context(|| format!("opening vector store at {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Compare the catalog with what the store holds, logging each mismatch.
async fn reconcile_catalog(
    catalog: &PolicyCatalog,
    store: &dyn VectorStore,
    context: &str,
) -> anyhow::Result<()> {
    let sources = store.sources().await?;
    let reconciliation = catalog.reconcile(&sources);
    reconciliation.log_warnings(context);
    Ok(())
}

/// Wire the answer engine and the log it writes to.
async fn build_engine(
    config: &BotConfig,
    monitor: Arc<SideEffectMonitor>,
) -> anyhow::Result<Arc<AnswerEngine>> {
    let provider = create_provider(&config.llm)?;
    let brain = Arc::new(Brain::new(provider, config.llm.retry.clone()));
    let embedder: Arc<dyn Embedder> = create_embedder(&config.embeddings)?;
    let store = open_store(config).await?;

    let catalog = PolicyCatalog::new(config.catalog.clone());
    reconcile_catalog(&catalog, store.as_ref(), "startup").await?;

    let log = Arc::new(
        SqliteInteractionLog::open(&config.interaction_log.path)
            .await
            .with_context(|| {
                format!(
                    "opening interaction log at {}",
                    config.interaction_log.path.display()
                )
            })?,
    );

    let mailer: Arc<dyn EscalationMailer> = if config.escalation.is_configured() {
        Arc::new(SmtpMailer::from_config(&config.escalation)?)
    } else {
        warn!("No SMTP relay configured; escalation e-mails will fail and only be logged");
        Arc::new(DisabledMailer)
    };
    let recipients = config.escalation.resolved_recipients();
    if recipients.is_empty() {
        warn!("No HR recipients configured");
    }
    let tools = Arc::new(ToolRegistry::hr_tools(log, mailer, recipients));

    let router = PolicyRouter::new(brain.clone(), catalog, config.agent.router_temperature);
    let retriever = PassageRetriever::new(embedder, store);

    Ok(Arc::new(AnswerEngine::new(
        brain,
        router,
        retriever,
        tools,
        monitor,
        AnswerSettings::from_config(config),
    )))
}

async fn handle_serve(mut config: BotConfig, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let verify_token = config.whatsapp.verify_token()?;
    let http = RealWhatsAppHttp::from_config(&config.whatsapp)?;

    let monitor = Arc::new(SideEffectMonitor::new());
    let engine = build_engine(&config, monitor.clone()).await?;
    let history = Arc::new(InMemoryConversationStore::new(
        Duration::from_secs(config.history.ttl_secs),
        config.agent.max_history_messages,
    ));
    let sender = Arc::new(WhatsAppSender::from_config(
        Box::new(http),
        &config.whatsapp,
        monitor.clone(),
    ));
    let service = Arc::new(ChatService::new(engine, history, sender, monitor));

    let state = Arc::new(WebhookState::new(
        service,
        verify_token,
        config.whatsapp.clone(),
    ));
    run_gateway(state, &config.server).await?;
    Ok(())
}

async fn handle_ingest(config: &BotConfig, rebuild: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    if rebuild {
        let dropped = store.drop_collection().await?;
        info!(dropped, collection = %config.store.collection, "Collection dropped");
    }

    let splitter = TextSplitter::new(
        config.documents.chunk_size,
        config.documents.chunk_overlap,
        config.documents.id_prefix.clone(),
    )?;
    let embedder = create_embedder(&config.embeddings)?;
    let pipeline = IngestionPipeline::new(
        &config.documents,
        splitter,
        embedder,
        store,
        PolicyCatalog::new(config.catalog.clone()),
    );
    let report = pipeline.run().await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("Documents seen:   {}", report.documents_seen);
    println!("Documents skipped: {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("  - {}: {}", skipped.path.display(), skipped.reason);
    }
    println!("Chunks total:     {}", report.chunks_total);
    println!("Chunks existing:  {}", report.chunks_existing);
    println!("Chunks new:       {}", report.chunks_new);
    println!("Store count:      {}", report.store_count);
    if report.is_noop() {
        println!("Nothing new to ingest.");
    }
    for name in &report.catalog.undescribed {
        println!("Warning: {name} has no catalog description");
    }
    for name in &report.catalog.missing {
        println!("Warning: catalog entry {name} has no document");
    }
}

async fn handle_ask(config: &BotConfig, question: &str) -> anyhow::Result<()> {
    let monitor = Arc::new(SideEffectMonitor::new());
    let engine = build_engine(config, monitor.clone()).await?;
    let outcome = engine.answer(&[], question).await?;

    // let logging and escalation finish before the runtime shuts down
    for handle in outcome.pending_effects {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background effect panicked");
        }
    }

    println!("{}", outcome.reply);
    info!(
        kind = ?outcome.kind,
        document = outcome.document.as_deref().unwrap_or("-"),
        context_found = outcome.context_found,
        model_calls = outcome.model_calls,
        tools = ?outcome.tools_called,
        "Turn finished"
    );
    let failures = monitor.snapshot();
    if failures.total() > 0 {
        eprintln!("Side-effect failures: {}", serde_json::to_string(&failures)?);
    }
    Ok(())
}

async fn handle_init_db(config: &BotConfig) -> anyhow::Result<()> {
    let log = SqliteInteractionLog::open(&config.interaction_log.path).await?;
    let (questions, unresolved) = log.counts().await?;
    println!("Interaction log ready at {}", log.path().display());
    println!("  question_agent_ia: {questions} rows");
    println!("  unknown_question:  {unresolved} rows");
    Ok(())
}

async fn handle_catalog(config: &BotConfig) -> anyhow::Result<()> {
    let catalog = PolicyCatalog::new(config.catalog.clone());
    println!("Policy catalog ({} documents):", catalog.len());
    println!("{}", catalog.format_for_prompt());
    println!();

    let store = open_store(config).await?;
    let sources = store.sources().await?;
    let reconciliation = catalog.reconcile(&sources);
    if reconciliation.is_clean() {
        println!("Catalog matches the {} stored documents.", sources.len());
        return Ok(());
    }
    for name in &reconciliation.undescribed {
        println!("Stored but not described (never routed to): {name}");
    }
    for name in &reconciliation.missing {
        println!("Described but not ingested: {name}");
    }
    Ok(())
}
