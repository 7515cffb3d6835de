//! Run orchestration.
//!
//! Each run mode drives the source clients, reconciles the resulting
//! candidates against the corpus and, for full-text runs, turns matched PMC
//! bodies into stored text units:
//!
//!   semantic-scholar  author → paper ids → records → reconcile
//!   hybrid            PubMed author search → topic filter → S2 lookup by DOI
//!                     → field-wise merge → reconcile
//!   full-text         PMC author search → topic filter → bodies → reconcile
//!                     → extract, normalise, chunk, embed → text units
//!   backfill-links    DOI-linked records → landing page → single PDF link
//!   dedupe            keyed texts → embeddings → near-duplicate clusters
//!
//! Runs are strictly sequential. Per-item failures are recorded in the
//! [`RunSummary`]; run-fatal errors (an unreachable source or database)
//! abort the run and propagate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use litmerge_common::{ExternalIdentifierSet, IdField, LitmergeError, Result};
use litmerge_db::{CanonicalRecord, CorpusStore, RecordCandidate, RecordField, TextUnitMetadata, TextUnitRecord};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chunker::{chunk_text, ChunkerConfig};
use crate::dedup::{cluster, embed_missing, redundant_keys, DuplicateCluster, EmbeddableItem, TextItem};
use crate::embedding::EmbeddingProvider;
use crate::extract::extract_body;
use crate::links::{LinkResolver, DOI_RESOLVER_PREFIX};
use crate::models::{PaperBody, SourceRecord};
use crate::normalise::EntityTable;
use crate::reconcile::{candidate_identity, merge_hybrid, BatchReport, IdentifierReconciler, ItemFailure, TopicGuard};
use crate::sources::{matches_topic, SourceFetcher};

/// Provenance tag written on text units derived from PMC bodies.
pub const DEFAULT_TEXT_UNIT_SOURCE: &str = "pubmed-script";

/// Identifier fields used to pair a fetched body with a record, in priority order.
const BODY_MATCH_ORDER: [IdField; 3] = [IdField::PmcId, IdField::PubmedId, IdField::Doi];

// ── Run summary ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    SemanticScholar,
    Hybrid,
    FullText,
    BackfillLinks,
}

/// Outcome of one run. `skipped` items were never attempted.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub job_id: Uuid,
    pub mode: RunMode,
    pub attempted: usize,
    pub succeeded: usize,
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
    pub text_units_inserted: usize,
    pub links_resolved: usize,
    pub failures: Vec<ItemFailure>,
    pub duration_ms: u64,
}

impl RunSummary {
    fn new(mode: RunMode) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            mode,
            attempted: 0,
            succeeded: 0,
            created: 0,
            existing: 0,
            skipped: 0,
            text_units_inserted: 0,
            links_resolved: 0,
            failures: Vec::new(),
            duration_ms: 0,
        }
    }

    /// A run fails only when it attempted items and none of them succeeded.
    pub fn is_success(&self) -> bool {
        self.succeeded > 0 || self.attempted == 0
    }

    fn absorb(&mut self, report: &BatchReport) {
        self.attempted += report.attempted;
        self.succeeded += report.succeeded();
        self.created += report.created();
        self.existing += report.succeeded() - report.created();
        self.failures.extend(report.failures.iter().cloned());
    }

    /// An item that failed before reaching reconciliation.
    fn fail_item(&mut self, identity: String, err: &LitmergeError) {
        warn!(identity = %identity, kind = %err.kind(), error = %err, "Item failed");
        self.attempted += 1;
        self.failures.push(ItemFailure::new(identity, err));
    }

    /// A failure on an item already counted as attempted.
    fn note_failure(&mut self, identity: String, err: &LitmergeError) {
        warn!(identity = %identity, kind = %err.kind(), error = %err, "Post-processing failed");
        self.failures.push(ItemFailure::new(identity, err));
    }

    fn finish(mut self, t0: Instant) -> Self {
        self.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            job_id      = %self.job_id,
            mode        = ?self.mode,
            attempted   = self.attempted,
            succeeded   = self.succeeded,
            created     = self.created,
            existing    = self.existing,
            skipped     = self.skipped,
            text_units  = self.text_units_inserted,
            links       = self.links_resolved,
            failures    = self.failures.len(),
            duration_ms = self.duration_ms,
            "Run complete"
        );
        self
    }
}

/// Near-duplicate groups for a dedupe run.
#[derive(Debug, Clone, Serialize)]
pub struct DedupeReport {
    pub items: usize,
    pub threshold: f64,
    pub clusters: Vec<DuplicateCluster<String>>,
    pub redundant_keys: Vec<String>,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct IngestionOrchestrator {
    store: Arc<dyn CorpusStore>,
    reconciler: IdentifierReconciler,
    topic_keywords: Vec<String>,
    entities: EntityTable,
    chunker: ChunkerConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    text_unit_source: String,
}

impl IngestionOrchestrator {
    pub fn new(store: Arc<dyn CorpusStore>, topic_keywords: Vec<String>) -> Self {
        let guard = TopicGuard::new(&topic_keywords);
        Self {
            reconciler: IdentifierReconciler::new(store.clone(), guard),
            store,
            topic_keywords,
            entities: EntityTable::default(),
            chunker: ChunkerConfig::default(),
            embedder: None,
            text_unit_source: DEFAULT_TEXT_UNIT_SOURCE.to_string(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_entities(mut self, entities: EntityTable) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_text_unit_source(mut self, source: &str) -> Self {
        self.text_unit_source = source.to_string();
        self
    }

    pub fn reconciler(&self) -> &IdentifierReconciler {
        &self.reconciler
    }

    // ── semantic-scholar ──────────────────────────────────────────────────────

    #[instrument(skip(self, s2))]
    pub async fn run_semantic_scholar(&self, s2: &dyn SourceFetcher, author: &str) -> Result<RunSummary> {
        let t0 = Instant::now();
        let mut summary = RunSummary::new(RunMode::SemanticScholar);

        let Some(ids) = search_or_empty(s2, author).await? else {
            return Ok(summary.finish(t0));
        };
        let records = s2.fetch_by_ids(&ids).await?;
        info!(ids = ids.len(), records = records.len(), "Fetched Semantic Scholar records");

        let mut candidates = Vec::with_capacity(records.len());
        for record in &records {
            match record.to_candidate() {
                Ok(c) => candidates.push(c),
                Err(e) => summary.fail_item(record_identity(record), &e),
            }
        }

        let report = self.reconciler.create_or_get_batch(&candidates).await?;
        summary.absorb(&report);
        Ok(summary.finish(t0))
    }

    // ── hybrid ────────────────────────────────────────────────────────────────

    #[instrument(skip(self, pubmed, s2))]
    pub async fn run_hybrid(
        &self,
        pubmed: &dyn SourceFetcher,
        s2: &dyn SourceFetcher,
        author: &str,
    ) -> Result<RunSummary> {
        let t0 = Instant::now();
        let mut summary = RunSummary::new(RunMode::Hybrid);

        let records = self.on_topic_records(pubmed, author, &mut summary).await?;

        let mut candidates = Vec::new();
        for record in &records {
            let Some(doi) = record.identifiers.get(IdField::Doi) else {
                debug!(identity = %record_identity(record), "No DOI, skipping");
                summary.skipped += 1;
                continue;
            };

            let fallback = match record.to_candidate() {
                Ok(c) => c,
                Err(e) => {
                    summary.fail_item(record_identity(record), &e);
                    continue;
                }
            };

            // Existing records are skipped before the Semantic Scholar lookup.
            if let Some(existing) = self.reconciler.find_match(&fallback.identifiers).await? {
                info!(record_id = %existing.id, doi, "Record already exists");
                summary.skipped += 1;
                continue;
            }

            match s2.fetch_by_doi(doi).await.and_then(|r| r.to_candidate()) {
                Ok(preferred) => candidates.push(merge_hybrid(&preferred, &fallback)),
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => summary.fail_item(candidate_identity(&fallback), &e),
            }
        }

        let report = self.reconciler.create_or_get_batch(&candidates).await?;
        summary.absorb(&report);
        Ok(summary.finish(t0))
    }

    // ── full-text ─────────────────────────────────────────────────────────────

    #[instrument(skip(self, pmc))]
    pub async fn run_full_text(&self, pmc: &dyn SourceFetcher, author: &str) -> Result<RunSummary> {
        let t0 = Instant::now();
        let mut summary = RunSummary::new(RunMode::FullText);

        let records = self.on_topic_records(pmc, author, &mut summary).await?;

        let pmc_ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.identifiers.get(IdField::PmcId))
            .map(|id| id.trim_start_matches("PMC").to_string())
            .collect();
        let bodies = pmc.fetch_bodies_by_ids(&pmc_ids).await?;
        let with_body: HashSet<&str> = bodies
            .iter()
            .filter_map(|b| b.identifiers.get(IdField::PmcId))
            .collect();
        info!(records = records.len(), bodies = bodies.len(), "Fetched PMC bodies");

        let mut candidates = Vec::new();
        for record in &records {
            let has_body = record
                .identifiers
                .get(IdField::PmcId)
                .is_some_and(|id| with_body.contains(id));
            if !has_body {
                debug!(identity = %record_identity(record), "No PMC body, skipping");
                summary.skipped += 1;
                continue;
            }
            match record.to_candidate() {
                Ok(c) => candidates.push(c),
                Err(e) => summary.fail_item(record_identity(record), &e),
            }
        }

        let report = self.reconciler.create_or_get_batch(&candidates).await?;
        summary.absorb(&report);

        for outcome in &report.records {
            let record = outcome.record();
            match self.store_body(record, &bodies).await {
                Ok(n) => summary.text_units_inserted += n,
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => summary.note_failure(record.identifiers.describe(), &e),
            }
        }

        Ok(summary.finish(t0))
    }

    /// Turn the matching body into text units. Returns how many were inserted.
    #[instrument(skip(self, record, bodies), fields(record_id = %record.id))]
    async fn store_body(&self, record: &CanonicalRecord, bodies: &[PaperBody]) -> Result<usize> {
        if self.store.exists_for_record(record.id).await? {
            debug!("Text units already stored, skipping");
            return Ok(0);
        }
        let Some(body) = match_body(&record.identifiers, bodies) else {
            debug!("No matching body");
            return Ok(0);
        };

        let text = self.entities.normalize(&extract_body(&body.sections));
        let chunks = chunk_text(&text, &self.chunker);
        if chunks.is_empty() {
            return Ok(0);
        }

        let embeddings: Vec<Option<Vec<f32>>> = match &self.embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let vectors = embedder.embed(&texts).await?;
                if vectors.len() != texts.len() {
                    return Err(LitmergeError::Other(anyhow::anyhow!(
                        "embedding provider returned {} vectors for {} chunks",
                        vectors.len(),
                        texts.len()
                    )));
                }
                vectors.into_iter().map(Some).collect()
            }
            None => vec![None; chunks.len()],
        };

        let metadata = TextUnitMetadata {
            title: record.title.clone(),
            pmc_id: body.identifiers.get(IdField::PmcId).map(String::from),
            pubmed_id: body.identifiers.get(IdField::PubmedId).map(String::from),
            doi: body.identifiers.get(IdField::Doi).map(String::from),
            source: self.text_unit_source.clone(),
        };

        let mut inserted = 0;
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            let unit = TextUnitRecord {
                id: Uuid::new_v4(),
                record_id: record.id,
                chunk_index: chunk.index,
                text: chunk.text,
                embedding,
                metadata: metadata.clone(),
                created_at: Utc::now(),
            };
            self.store.insert_text_unit(&unit).await?;
            inserted += 1;
        }
        info!(n = inserted, "Stored text units");
        Ok(inserted)
    }

    // ── backfill-links ────────────────────────────────────────────────────────

    #[instrument(skip(self, resolver))]
    pub async fn backfill_links(&self, resolver: &dyn LinkResolver) -> Result<RunSummary> {
        let t0 = Instant::now();
        let mut summary = RunSummary::new(RunMode::BackfillLinks);

        let records = self.store.list_by_link_prefix(DOI_RESOLVER_PREFIX).await?;
        info!(n = records.len(), "Records linked to the DOI resolver");

        for record in &records {
            if record.resolved_link.is_some() {
                summary.skipped += 1;
                continue;
            }
            summary.attempted += 1;
            let resolved = match resolver.resolve(&record.primary_link).await {
                Ok(r) => r,
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    summary.note_failure(record.identifiers.describe(), &e);
                    continue;
                }
            };
            if let Some(link) = resolved {
                self.store.update_field(record.id, RecordField::ResolvedLink, &link).await?;
                debug!(record_id = %record.id, link = %link, "Resolved full-text link");
                summary.links_resolved += 1;
            }
            summary.succeeded += 1;
        }

        Ok(summary.finish(t0))
    }

    // ── dedupe ────────────────────────────────────────────────────────────────

    /// Cluster keyed texts, embedding the ones that arrive without a vector.
    #[instrument(skip(self, items), fields(n = items.len()))]
    pub async fn dedupe(&self, items: Vec<TextItem<String>>, threshold: f64) -> Result<DedupeReport> {
        let n = items.len();
        let embedded = match &self.embedder {
            Some(embedder) => embed_missing(embedder.as_ref(), items).await?,
            None => {
                if items.iter().any(|it| it.vector.is_none()) {
                    return Err(LitmergeError::Config(
                        "items without vectors need an embedding backend".into(),
                    ));
                }
                items
                    .into_iter()
                    .map(|it| EmbeddableItem {
                        key: it.key,
                        text: it.text,
                        vector: it.vector.unwrap_or_default(),
                    })
                    .collect()
            }
        };

        let clusters = cluster(&embedded, threshold)?;
        let redundant = redundant_keys(&clusters);
        info!(items = n, clusters = clusters.len(), redundant = redundant.len(), "Dedupe complete");
        Ok(DedupeReport { items: n, threshold, clusters, redundant_keys: redundant })
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Author search plus record fetch, keeping records that mention a topic keyword.
    async fn on_topic_records(
        &self,
        fetcher: &dyn SourceFetcher,
        author: &str,
        summary: &mut RunSummary,
    ) -> Result<Vec<SourceRecord>> {
        let Some(ids) = search_or_empty(fetcher, author).await? else {
            return Ok(Vec::new());
        };
        let records = fetcher.fetch_by_ids(&ids).await?;
        let total = records.len();
        let kept: Vec<SourceRecord> = records
            .into_iter()
            .filter(|r| matches_topic(r, &self.topic_keywords))
            .collect();
        summary.skipped += total - kept.len();
        info!(source = fetcher.name(), total, kept = kept.len(), "Topic filter applied");
        Ok(kept)
    }
}

/// Author search where "no results" means an empty run rather than an error.
async fn search_or_empty(fetcher: &dyn SourceFetcher, author: &str) -> Result<Option<Vec<String>>> {
    let name = author.replace('+', " ");
    match fetcher.search_by_author(&name).await {
        Ok(ids) => Ok(Some(ids)),
        Err(LitmergeError::NoResults(msg)) => {
            info!(source = fetcher.name(), author = %name, reason = %msg, "Nothing to ingest");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Body for a record: PMC id first, then PubMed id, then DOI.
pub fn match_body<'a>(ids: &ExternalIdentifierSet, bodies: &'a [PaperBody]) -> Option<&'a PaperBody> {
    BODY_MATCH_ORDER.iter().find_map(|field| {
        let wanted = ids.get(*field)?;
        bodies.iter().find(|b| b.identifiers.get(*field) == Some(wanted))
    })
}

fn record_identity(record: &SourceRecord) -> String {
    candidate_identity(&RecordCandidate::new(record.identifiers.clone(), record.title.clone(), ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionNode;

    fn body(pmc: Option<&str>, pmid: Option<&str>, doi: Option<&str>, text: &str) -> PaperBody {
        PaperBody {
            identifiers: ExternalIdentifierSet {
                pmc_id: pmc.map(String::from),
                pubmed_id: pmid.map(String::from),
                doi: doi.map(String::from),
                ..Default::default()
            },
            sections: vec![SectionNode::with_paragraphs([text])],
        }
    }

    #[test]
    fn test_body_match_priority() {
        let bodies = vec![
            body(None, None, Some("10.1/x"), "by doi"),
            body(None, Some("42"), None, "by pmid"),
            body(Some("PMC7"), None, None, "by pmc"),
        ];
        let ids = ExternalIdentifierSet {
            pmc_id: Some("PMC7".into()),
            pubmed_id: Some("42".into()),
            doi: Some("10.1/x".into()),
            ..Default::default()
        };
        let hit = match_body(&ids, &bodies).unwrap();
        assert_eq!(extract_body(&hit.sections), "by pmc");

        let ids = ExternalIdentifierSet { pubmed_id: Some("42".into()), doi: Some("10.1/x".into()), ..Default::default() };
        assert_eq!(extract_body(&match_body(&ids, &bodies).unwrap().sections), "by pmid");

        let ids = ExternalIdentifierSet { pmc_id: Some("PMC9".into()), ..Default::default() };
        assert!(match_body(&ids, &bodies).is_none());
    }

    #[test]
    fn test_success_rule() {
        let mut s = RunSummary::new(RunMode::Hybrid);
        assert!(s.is_success());
        s.attempted = 3;
        assert!(!s.is_success());
        s.succeeded = 1;
        assert!(s.is_success());
    }

    #[test]
    fn test_summary_serializes_mode() {
        let s = RunSummary::new(RunMode::FullText);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["mode"], "full-text");
        assert_eq!(json["failures"], serde_json::json!([]));
    }
}
