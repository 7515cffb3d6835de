//! Configuration loading for litmerge.
//! Reads litmerge.toml from the path given on the command line, the
//! LITMERGE_CONFIG env var, or the current directory.
//!
//! Secrets never live in the file: each section names the environment
//! variable that holds its key, and the value is read into a `SecretString`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use litmerge_ingestion::embedding::EmbeddingBackend;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "litmerge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub embedding: EmbeddingSection,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub link_resolver: LinkResolverConfig,
}

// ── database ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Used when the env var named by `url_env` is unset.
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_database_url_env")]
    pub url_env: String,
}

fn default_database_url()     -> String { "postgres://litmerge@localhost:5432/litmerge".to_string() }
fn default_database_url_env() -> String { "DATABASE_URL".to_string() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: default_database_url(), url_env: default_database_url_env() }
    }
}

impl DatabaseConfig {
    /// Connection string, preferring the environment over the file.
    pub fn connection_url(&self) -> SecretString {
        secret_from_env(Some(&self.url_env)).unwrap_or_else(|| SecretString::from(self.url.clone()))
    }
}

// ── sources ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_ncbi_key_env")]
    pub ncbi_api_key_env: String,
    #[serde(default = "default_s2_key_env")]
    pub semantic_scholar_api_key_env: String,
    /// `retmax` for NCBI author searches.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_ncbi_key_env() -> String { "NCBI_API_KEY".to_string() }
fn default_s2_key_env()   -> String { "S2_API_KEY".to_string() }
fn default_max_results()  -> usize  { 200 }

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            ncbi_api_key_env: default_ncbi_key_env(),
            semantic_scholar_api_key_env: default_s2_key_env(),
            max_results: default_max_results(),
        }
    }
}

impl SourcesConfig {
    pub fn ncbi_api_key(&self) -> Option<SecretString> {
        secret_from_env(Some(&self.ncbi_api_key_env))
    }

    pub fn semantic_scholar_api_key(&self) -> Option<SecretString> {
        secret_from_env(Some(&self.semantic_scholar_api_key_env))
    }
}

// ── embedding ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_embed_dim")]
    pub dim: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_embed_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "bool_true")]
    pub normalize: bool,
}

fn bool_true()             -> bool             { true }
fn default_backend()       -> EmbeddingBackend { EmbeddingBackend::OpenAi }
fn default_embed_model()   -> String           { "text-embedding-3-small".to_string() }
fn default_embed_dim()     -> usize            { 1536 }
fn default_batch_size()    -> usize            { 32 }
fn default_embed_key_env() -> Option<String>   { Some("OPENAI_API_KEY".to_string()) }

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            enabled: bool_true(),
            backend: default_backend(),
            model: default_embed_model(),
            dim: default_embed_dim(),
            batch_size: default_batch_size(),
            base_url: None,
            api_key_env: default_embed_key_env(),
            normalize: bool_true(),
        }
    }
}

impl EmbeddingSection {
    pub fn to_client_config(&self) -> litmerge_ingestion::embedding::EmbeddingConfig {
        litmerge_ingestion::embedding::EmbeddingConfig {
            backend: self.backend,
            api_key: secret_from_env(self.api_key_env.as_deref()),
            model: self.model.clone(),
            dim: self.dim,
            batch_size: self.batch_size,
            base_url: self.base_url.clone(),
            normalize: self.normalize,
        }
    }
}

// ── ingestion ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_topic_keywords")]
    pub topic_keywords: Vec<String>,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_text_unit_source")]
    pub text_unit_source: String,
    /// Extra `reference = "literal"` pairs layered over the built-in entity table.
    #[serde(default)]
    pub extra_entities: BTreeMap<String, String>,
}

fn default_topic_keywords()   -> Vec<String> { vec!["endometriosis".to_string()] }
fn default_dedup_threshold()  -> f64         { 0.9 }
fn default_chunk_size()       -> usize       { 1000 }
fn default_chunk_overlap()    -> usize       { 200 }
fn default_min_delay_ms()     -> u64         { 1_000 }
fn default_max_delay_ms()     -> u64         { 3_000 }
fn default_text_unit_source() -> String      { litmerge_ingestion::pipeline::DEFAULT_TEXT_UNIT_SOURCE.to_string() }

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            topic_keywords: default_topic_keywords(),
            dedup_threshold: default_dedup_threshold(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            text_unit_source: default_text_unit_source(),
            extra_entities: BTreeMap::new(),
        }
    }
}

// ── logging ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String { "litmerge=debug,info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_log_filter(), json: false }
    }
}

// ── link resolver ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResolverConfig {
    /// Publisher hosts the landing-page resolver may contact.
    #[serde(default = "default_publisher_domains")]
    pub publisher_domains: Vec<String>,
}

fn default_publisher_domains() -> Vec<String> {
    [
        "academic.oup.com",
        "onlinelibrary.wiley.com",
        "link.springer.com",
        "www.sciencedirect.com",
        "www.nature.com",
        "www.tandfonline.com",
        "www.mdpi.com",
        "www.frontiersin.org",
        "journals.plos.org",
        "bmj.com",
        "jamanetwork.com",
        "pmc.ncbi.nlm.nih.gov",
    ]
    .iter()
    .map(|d| d.to_string())
    .collect()
}

impl Default for LinkResolverConfig {
    fn default() -> Self {
        Self { publisher_domains: default_publisher_domains() }
    }
}

// ── loading ───────────────────────────────────────────────────────────────────

/// Non-empty value of the named env var as a secret.
fn secret_from_env(var: Option<&str>) -> Option<SecretString> {
    let name = var?.trim();
    if name.is_empty() {
        return None;
    }
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

mod tests;

impl Config {
    /// Load configuration.
    ///
    /// An explicit path (flag or LITMERGE_CONFIG) must exist. Without one,
    /// a missing litmerge.toml means built-in defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let explicit: Option<PathBuf> = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("LITMERGE_CONFIG").ok().map(PathBuf::from));

        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!(
                        "Config file not found: {}\n\
                         Copy litmerge.example.toml to litmerge.toml and edit it.",
                        p.display()
                    );
                }
                p
            }
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !p.exists() {
                    return Ok(Config::default());
                }
                p
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let t = self.ingestion.dedup_threshold;
        if !(t > 0.0 && t <= 1.0) {
            anyhow::bail!("ingestion.dedup_threshold must be in (0, 1], got {t}");
        }
        if self.ingestion.chunk_overlap >= self.ingestion.chunk_size {
            anyhow::bail!(
                "ingestion.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.ingestion.chunk_overlap,
                self.ingestion.chunk_size
            );
        }
        Ok(())
    }
}
