//! litmerge: bibliographic reconciliation and ingestion.
//! Entry point for the command-line binary.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use litmerge_common::{Pacing, SandboxClient};
use litmerge_db::{CorpusStore, MemoryStore, PgStore};
use litmerge_ingestion::chunker::ChunkerConfig;
use litmerge_ingestion::dedup::TextItem;
use litmerge_ingestion::embedding::{EmbeddingBackend, EmbeddingClient};
use litmerge_ingestion::links::HttpLinkResolver;
use litmerge_ingestion::pipeline::DedupeReport;
use litmerge_ingestion::sources::pubmed::{PubMedClient, PubMedDatabase};
use litmerge_ingestion::sources::semantic_scholar::SemanticScholarClient;
use litmerge_ingestion::{EntityTable, IngestionOrchestrator, RunSummary};
use secrecy::ExposeSecret;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

#[derive(Debug, Parser)]
#[command(name = "litmerge", version, about = "Reconcile and ingest bibliographic records into a deduplicated corpus")]
struct Cli {
    /// Path to litmerge.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use an in-memory store instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch an author's works from a source and reconcile them into the corpus
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },
    /// Cluster near-duplicate texts from a JSON file of {key, text, vector?} items
    Dedupe {
        #[arg(long)]
        input: PathBuf,
        /// Overrides ingestion.dedup_threshold
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Resolve full-text PDF links for records that only link to doi.org
    BackfillLinks,
}

#[derive(Debug, Subcommand)]
enum IngestSource {
    SemanticScholar {
        #[arg(long)]
        author: String,
    },
    Hybrid {
        #[arg(long)]
        author: String,
    },
    FullText {
        #[arg(long)]
        author: String,
    },
}

/// The store for one run. Owns the PostgreSQL connection so it can be closed.
enum Store {
    Memory(Arc<MemoryStore>),
    Postgres(Arc<PgStore>),
}

impl Store {
    async fn open(config: &Config, dry_run: bool) -> anyhow::Result<Self> {
        if dry_run {
            info!("Dry run: using in-memory store");
            return Ok(Store::Memory(Arc::new(MemoryStore::new())));
        }
        let url = config.database.connection_url();
        let pg = PgStore::connect(url.expose_secret())
            .await
            .context("connecting to PostgreSQL")?;
        pg.initialize().await.context("initializing schema")?;
        info!("PostgreSQL connected.");
        Ok(Store::Postgres(Arc::new(pg)))
    }

    fn shared(&self) -> Arc<dyn CorpusStore> {
        match self {
            Store::Memory(s) => s.clone(),
            Store::Postgres(s) => s.clone(),
        }
    }

    async fn close(self) {
        if let Store::Postgres(pg) = self {
            match Arc::try_unwrap(pg) {
                Ok(pg) => pg.close().await,
                Err(_) => warn!("Store still shared at shutdown; connection dropped without close"),
            }
        }
    }
}

enum Outcome {
    Run(RunSummary),
    Dedupe(DedupeReport),
}

fn init_logging(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cfg.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn pacing(config: &Config) -> Pacing {
    Pacing::new(config.ingestion.min_delay_ms, config.ingestion.max_delay_ms)
}

fn build_orchestrator(config: &Config, store: Arc<dyn CorpusStore>) -> anyhow::Result<IngestionOrchestrator> {
    let entities = config
        .ingestion
        .extra_entities
        .iter()
        .fold(EntityTable::default(), |table, (reference, literal)| table.with(reference, literal));
    let chunker = ChunkerConfig {
        chunk_size: config.ingestion.chunk_size,
        chunk_overlap: config.ingestion.chunk_overlap,
    };

    let mut orch = IngestionOrchestrator::new(store, config.ingestion.topic_keywords.clone())
        .with_chunker(chunker)
        .with_entities(entities)
        .with_text_unit_source(&config.ingestion.text_unit_source);

    if config.embedding.enabled {
        let cfg = config.embedding.to_client_config();
        let needs_key = matches!(cfg.backend, EmbeddingBackend::OpenAi | EmbeddingBackend::Gemini);
        if needs_key && cfg.api_key.is_none() {
            warn!(
                backend = ?cfg.backend,
                env = ?config.embedding.api_key_env,
                "Embedding backend configured but no API key found"
            );
        }
        info!("Embedding enabled: {:?} / {}", cfg.backend, cfg.model);
        let client = SandboxClient::new("embedding")?.with_pacing(pacing(config));
        orch = orch.with_embedder(Arc::new(EmbeddingClient::new(cfg, client)));
    }
    Ok(orch)
}

fn pubmed_client(config: &Config) -> anyhow::Result<PubMedClient> {
    let client = SandboxClient::new("pmc")?.with_pacing(pacing(config));
    Ok(PubMedClient::new(
        client,
        PubMedDatabase::Pmc,
        config.sources.ncbi_api_key(),
        config.sources.max_results,
    ))
}

fn semantic_scholar_client(config: &Config) -> anyhow::Result<SemanticScholarClient> {
    let mut client = SandboxClient::new("semanticscholar")?.with_pacing(pacing(config));
    if let Some(key) = config.sources.semantic_scholar_api_key() {
        client = client.with_header("x-api-key", key.expose_secret());
    }
    Ok(SemanticScholarClient::new(client))
}

async fn run(command: Command, config: &Config, store: Arc<dyn CorpusStore>) -> anyhow::Result<Outcome> {
    let orch = build_orchestrator(config, store)?;

    let outcome = match command {
        Command::Ingest { source: IngestSource::SemanticScholar { author } } => {
            let s2 = semantic_scholar_client(config)?;
            Outcome::Run(orch.run_semantic_scholar(&s2, &author).await?)
        }
        Command::Ingest { source: IngestSource::Hybrid { author } } => {
            let pubmed = pubmed_client(config)?;
            let s2 = semantic_scholar_client(config)?;
            Outcome::Run(orch.run_hybrid(&pubmed, &s2, &author).await?)
        }
        Command::Ingest { source: IngestSource::FullText { author } } => {
            let pmc = pubmed_client(config)?;
            Outcome::Run(orch.run_full_text(&pmc, &author).await?)
        }
        Command::BackfillLinks => {
            let client = SandboxClient::new("links")?.with_pacing(pacing(config));
            let resolver = HttpLinkResolver::new(client, &config.link_resolver.publisher_domains);
            Outcome::Run(orch.backfill_links(&resolver).await?)
        }
        Command::Dedupe { input, threshold } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let items: Vec<TextItem<String>> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", input.display()))?;
            let threshold = threshold.unwrap_or(config.ingestion.dedup_threshold);
            Outcome::Dedupe(orch.dedupe(items, threshold).await?)
        }
    };
    Ok(outcome)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Dedupe never touches the corpus.
    let dry_run = cli.dry_run || matches!(cli.command, Command::Dedupe { .. });
    let store = Store::open(&config, dry_run).await?;

    let outcome = run(cli.command, &config, store.shared()).await;
    store.close().await;

    let code = match outcome? {
        Outcome::Run(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                warn!(attempted = summary.attempted, "No item succeeded");
                ExitCode::FAILURE
            }
        }
        Outcome::Dedupe(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}
