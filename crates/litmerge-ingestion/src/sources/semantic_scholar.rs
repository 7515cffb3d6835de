//! Semantic Scholar Graph API client.
//!
//! Endpoints used (base https://api.semanticscholar.org/graph/v1):
//!   author/search?query=          author lookup
//!   author/{id}/papers            paper ids per author
//!   paper/batch  (POST)           full records for a list of paper ids
//!   paper/DOI:{doi}               single record by DOI

use std::collections::HashSet;

use async_trait::async_trait;
use litmerge_common::{LitmergeError, Result, SandboxClient as Client};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use super::{clean_doi, clean_pmcid, SourceFetcher};
use crate::models::{Author, PaperBody, SourceKind, SourceRecord};

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const PAPER_FIELDS: &str = "title,openAccessPdf,externalIds,authors,fieldsOfStudy,abstract";
/// Upper bound on ids per `paper/batch` request.
const BATCH_LIMIT: usize = 500;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AuthorSearchResponse {
    #[serde(default)]
    data: Vec<AuthorRef>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    #[serde(rename = "authorId")]
    author_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorPapersResponse {
    #[serde(default)]
    data: Vec<PaperRef>,
}

#[derive(Debug, Deserialize)]
struct PaperRef {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S2Paper {
    #[serde(rename = "paperId")]
    pub paper_id: String,
    #[serde(rename = "externalIds", default)]
    pub external_ids: Option<S2ExternalIds>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "openAccessPdf", default)]
    pub open_access_pdf: Option<S2OpenAccessPdf>,
    #[serde(rename = "fieldsOfStudy", default)]
    pub fields_of_study: Option<Vec<String>>,
    #[serde(default)]
    pub authors: Vec<S2Author>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S2Author {
    #[serde(rename = "authorId")]
    pub author_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct S2ExternalIds {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "PubMed")]
    pub pubmed: Option<String>,
    #[serde(rename = "PubMedCentral")]
    pub pubmed_central: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S2OpenAccessPdf {
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

impl From<S2Paper> for SourceRecord {
    fn from(p: S2Paper) -> Self {
        let mut rec = SourceRecord::new(SourceKind::SemanticScholar);
        rec.identifiers.source_system_id = Some(p.paper_id);
        if let Some(ext) = p.external_ids {
            rec.identifiers.doi = ext.doi.as_deref().and_then(clean_doi);
            rec.identifiers.pubmed_id = ext.pubmed.filter(|s| !s.trim().is_empty());
            rec.identifiers.pmc_id = ext.pubmed_central.as_deref().and_then(clean_pmcid);
        }
        rec.title = p.title.unwrap_or_default();
        rec.abstract_text = p.abstract_text;
        rec.open_access_pdf = p.open_access_pdf.and_then(|o| o.url).filter(|u| !u.trim().is_empty());
        rec.keywords = p.fields_of_study.unwrap_or_default();
        rec.authors = p
            .authors
            .into_iter()
            .filter_map(|a| a.name.map(|name| Author { name, source_author_id: a.author_id }))
            .collect();
        rec
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct SemanticScholarClient {
    client: Client,
    base_url: String,
}

impl SemanticScholarClient {
    pub fn new(client: Client) -> Self {
        Self { client, base_url: BASE_URL.to_string() }
    }

    async fn search_authors(&self, name: &str) -> Result<Vec<String>> {
        let url = format!("{}/author/search", self.base_url);
        let resp: AuthorSearchResponse = self.client.get_json(&url, &[("query", name)]).await?;
        let ids: Vec<String> = resp
            .data
            .into_iter()
            .filter_map(|a| {
                debug!(author_id = ?a.author_id, name = ?a.name, "Matched author");
                a.author_id
            })
            .collect();
        if ids.is_empty() {
            return Err(LitmergeError::NoResults(format!("no authors found with name: {name}")));
        }
        Ok(ids)
    }
}

#[async_trait]
impl SourceFetcher for SemanticScholarClient {
    fn name(&self) -> &'static str {
        "semanticscholar"
    }

    #[instrument(skip(self))]
    async fn search_by_author(&self, name: &str) -> Result<Vec<String>> {
        let authors = self.search_authors(name).await?;
        info!(n = authors.len(), "Found authors");

        let mut seen = HashSet::new();
        let mut paper_ids = Vec::new();
        for author_id in &authors {
            let url = format!("{}/author/{}/papers", self.base_url, author_id);
            let resp: AuthorPapersResponse = self.client.get_json(&url, &[("fields", "paperId")]).await?;
            debug!(author_id = %author_id, n = resp.data.len(), "Found papers");
            for id in resp.data.into_iter().filter_map(|p| p.paper_id) {
                if seen.insert(id.clone()) {
                    paper_ids.push(id);
                }
            }
        }
        if paper_ids.is_empty() {
            return Err(LitmergeError::NoResults(format!("no papers for author: {name}")));
        }
        Ok(paper_ids)
    }

    #[instrument(skip(self, ids), fields(n = ids.len()))]
    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<SourceRecord>> {
        let url = format!("{}/paper/batch?fields={}", self.base_url, PAPER_FIELDS);
        let mut records = Vec::with_capacity(ids.len());
        for batch in ids.chunks(BATCH_LIMIT) {
            let body = serde_json::json!({ "ids": batch });
            // Unknown ids come back as null entries.
            let papers: Vec<Option<S2Paper>> = self.client.post_json(&url, &body, None).await?;
            records.extend(papers.into_iter().flatten().map(SourceRecord::from));
        }
        Ok(records)
    }

    async fn fetch_bodies_by_ids(&self, _ids: &[String]) -> Result<Vec<PaperBody>> {
        Ok(vec![])
    }

    #[instrument(skip(self))]
    async fn fetch_by_doi(&self, doi: &str) -> Result<SourceRecord> {
        let url = format!("{}/paper/DOI:{}", self.base_url, doi);
        let paper: S2Paper = self.client.get_json(&url, &[("fields", PAPER_FIELDS)]).await?;
        Ok(paper.into())
    }
}
