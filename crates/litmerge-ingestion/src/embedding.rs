//! Embedding client: turns text units and generated items into vectors.
//!
//! Supports multiple backends:
//!   - OpenAI         (text-embedding-3-small / text-embedding-3-large)
//!   - Gemini         (text-embedding-004)
//!   - OpenAI-compat  (any /v1/embeddings endpoint)
//!   - Ollama         (nomic-embed-text or any ollama embedding model)
//!
//! All calls go through the paced `SandboxClient`, one request at a time.

use async_trait::async_trait;
use litmerge_common::{LitmergeError, Result, SandboxClient as Client};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One vector per input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ── Backend config ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EmbeddingConfig {
    pub backend:    EmbeddingBackend,
    pub api_key:    Option<SecretString>,
    pub model:      String,
    pub dim:        usize,
    pub batch_size: usize,
    pub base_url:   Option<String>,  // for compat/ollama
    /// L2-normalise every returned vector.
    pub normalize:  bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    OpenAi,
    Gemini,
    OpenAiCompatible,
    Ollama,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend:    EmbeddingBackend::OpenAi,
            api_key:    None,
            model:      "text-embedding-3-small".to_string(),
            dim:        1536,
            batch_size: 32,
            base_url:   None,
            normalize:  true,
        }
    }
}

// ── Embedding client ──────────────────────────────────────────────────────────

pub struct EmbeddingClient {
    cfg:    EmbeddingConfig,
    client: Client,
}

impl EmbeddingClient {
    /// A configured `base_url` host is added to the client allowlist.
    pub fn new(cfg: EmbeddingConfig, mut client: Client) -> Self {
        let host = cfg
            .base_url
            .as_deref()
            .and_then(|u| url::Url::parse(u).ok())
            .and_then(|u| u.host_str().map(String::from));
        if let Some(host) = host {
            client.allow_domain(&host);
        }
        Self { cfg, client }
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.cfg
    }

    /// Embed one request-sized batch.
    #[instrument(skip(self, texts), fields(n = texts.len(), backend = ?self.cfg.backend))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(vec![]); }
        match self.cfg.backend {
            EmbeddingBackend::OpenAi           => self.embed_openai(texts).await,
            EmbeddingBackend::Gemini           => self.embed_gemini(texts).await,
            EmbeddingBackend::OpenAiCompatible => self.embed_compat(texts).await,
            EmbeddingBackend::Ollama           => self.embed_ollama(texts).await,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.cfg
            .api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .ok_or_else(|| LitmergeError::Config(format!("{:?} embedding backend needs an API key", self.cfg.backend)))
    }

    // ── OpenAI ─────────────────────────────────────────────────────────────

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": &self.cfg.model,
            "input": texts,
        });
        let resp: serde_json::Value = self.client
            .post_json("https://api.openai.com/v1/embeddings", &body, Some(self.api_key()?))
            .await?;
        parse_openai_embeddings(&resp)
    }

    // ── Gemini ─────────────────────────────────────────────────────────────

    async fn embed_gemini(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<serde_json::Value> = texts.iter().map(|t| serde_json::json!({
            "model": format!("models/{}", self.cfg.model),
            "content": { "parts": [{"text": t}] }
        })).collect();
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:batchEmbedContents?key={}",
            self.cfg.model, self.api_key()?
        );
        let resp: serde_json::Value = self.client
            .post_json(&url, &serde_json::json!({"requests": requests}), None)
            .await?;
        resp["embeddings"]
            .as_array()
            .ok_or_else(|| malformed("gemini", "missing `embeddings`"))?
            .iter()
            .map(|e| parse_vector(&e["values"], "gemini"))
            .collect()
    }

    // ── OpenAI-compatible ──────────────────────────────────────────────────

    async fn embed_compat(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base = self.cfg.base_url.as_deref()
            .unwrap_or("http://localhost:11434").trim_end_matches('/');
        let url = format!("{}/v1/embeddings", base);
        let body = serde_json::json!({
            "model": &self.cfg.model,
            "input": texts,
        });
        let bearer = self.cfg.api_key.as_ref().map(|k| k.expose_secret());
        let resp: serde_json::Value = self.client.post_json(&url, &body, bearer).await?;
        parse_openai_embeddings(&resp)
    }

    // ── Ollama ─────────────────────────────────────────────────────────────

    async fn embed_ollama(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let base = self.cfg.base_url.as_deref()
            .unwrap_or("http://localhost:11434").trim_end_matches('/');
        let url = format!("{}/api/embeddings", base);
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let body = serde_json::json!({"model": &self.cfg.model, "prompt": text});
            let resp: serde_json::Value = self.client.post_json(&url, &body, None).await?;
            out.push(parse_vector(&resp["embedding"], "ollama")?);
        }
        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.cfg.batch_size.max(1)) {
            let vecs = self.embed_batch(batch).await?;
            if vecs.len() != batch.len() {
                return Err(malformed(
                    "embedding",
                    &format!("{} vectors for {} texts", vecs.len(), batch.len()),
                ));
            }
            for v in vecs {
                if v.len() != self.cfg.dim {
                    return Err(LitmergeError::DimensionMismatch { expected: self.cfg.dim, actual: v.len() });
                }
                out.push(if self.cfg.normalize { l2_normalize(&v) } else { v });
            }
        }
        debug!(n = out.len(), "Embedded texts");
        Ok(out)
    }
}

fn malformed(backend: &str, detail: &str) -> LitmergeError {
    LitmergeError::Other(anyhow::anyhow!("malformed {backend} embedding response: {detail}"))
}

fn parse_vector(value: &serde_json::Value, backend: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| malformed(backend, "vector is not an array"))?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| malformed(backend, "non-numeric component")))
        .collect()
}

fn parse_openai_embeddings(resp: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    resp["data"]
        .as_array()
        .ok_or_else(|| malformed("openai", "missing `data`"))?
        .iter()
        .map(|item| parse_vector(&item["embedding"], "openai"))
        .collect()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    let s: f32 = v.iter().map(|x| x * x).sum();
    s.sqrt().max(1e-10)
}

pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    v.iter().map(|x| x / norm).collect()
}
