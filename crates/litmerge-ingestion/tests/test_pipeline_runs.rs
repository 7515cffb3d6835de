//! Run modes end to end against the in-memory store and scripted sources.
//!
//! Run with: cargo test --package litmerge-ingestion --test test_pipeline_runs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use litmerge_common::{ErrorKind, ExternalIdentifierSet, LitmergeError, Result};
use litmerge_db::{
    CanonicalRecord, CorpusStore, DbError, MemoryStore, RecordCandidate, RecordField, TextUnitRecord,
};
use uuid::Uuid;
use litmerge_ingestion::dedup::TextItem;
use litmerge_ingestion::embedding::EmbeddingProvider;
use litmerge_ingestion::links::LinkResolver;
use litmerge_ingestion::sources::SourceFetcher;
use litmerge_ingestion::{IngestionOrchestrator, PaperBody, SectionNode, SourceKind, SourceRecord};

// ── Scripted collaborators ────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedSource {
    ids: Vec<String>,
    records: Vec<SourceRecord>,
    bodies: Vec<PaperBody>,
    by_doi: HashMap<String, SourceRecord>,
    outage_on_doi: Option<String>,
}

#[async_trait]
impl SourceFetcher for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn search_by_author(&self, name: &str) -> Result<Vec<String>> {
        if self.ids.is_empty() {
            return Err(LitmergeError::NoResults(format!("no papers for {name}")));
        }
        Ok(self.ids.clone())
    }

    async fn fetch_by_ids(&self, _ids: &[String]) -> Result<Vec<SourceRecord>> {
        Ok(self.records.clone())
    }

    async fn fetch_bodies_by_ids(&self, _ids: &[String]) -> Result<Vec<PaperBody>> {
        Ok(self.bodies.clone())
    }

    async fn fetch_by_doi(&self, doi: &str) -> Result<SourceRecord> {
        if self.outage_on_doi.as_deref() == Some(doi) {
            return Err(LitmergeError::upstream("scripted", "HTTP 503"));
        }
        self.by_doi
            .get(doi)
            .cloned()
            .ok_or_else(|| LitmergeError::NoResults(format!("unknown doi {doi}")))
    }
}

/// Every text embeds to the same unit vector.
struct ConstantEmbedder;

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct FixedResolver;

#[async_trait]
impl LinkResolver for FixedResolver {
    async fn resolve(&self, landing_url: &str) -> Result<Option<String>> {
        Ok(landing_url
            .ends_with("/10.1/a")
            .then(|| "https://journals.example.org/a.pdf".to_string()))
    }
}

/// Record lookups and inserts work; text-unit writes hit a dropped connection.
struct DroppedOnTextUnits(MemoryStore);

#[async_trait]
impl CorpusStore for DroppedOnTextUnits {
    async fn find_by_identifiers(&self, ids: &ExternalIdentifierSet) -> litmerge_db::Result<Option<CanonicalRecord>> {
        self.0.find_by_identifiers(ids).await
    }
    async fn insert(&self, candidate: &RecordCandidate) -> litmerge_db::Result<CanonicalRecord> {
        self.0.insert(candidate).await
    }
    async fn update_field(&self, id: Uuid, field: RecordField, value: &str) -> litmerge_db::Result<()> {
        self.0.update_field(id, field, value).await
    }
    async fn exists_for_record(&self, id: Uuid) -> litmerge_db::Result<bool> {
        self.0.exists_for_record(id).await
    }
    async fn insert_text_unit(&self, _unit: &TextUnitRecord) -> litmerge_db::Result<()> {
        Err(DbError::Connection("server closed the connection unexpectedly".into()))
    }
    async fn list_by_link_prefix(&self, prefix: &str) -> litmerge_db::Result<Vec<CanonicalRecord>> {
        self.0.list_by_link_prefix(prefix).await
    }
    async fn record_count(&self) -> litmerge_db::Result<usize> {
        self.0.record_count().await
    }
}

/// Fails on the landing page of 10.1/a, resolves everything else.
struct PartlyDownResolver;

#[async_trait]
impl LinkResolver for PartlyDownResolver {
    async fn resolve(&self, landing_url: &str) -> Result<Option<String>> {
        if landing_url.ends_with("/10.1/a") {
            return Err(LitmergeError::Other(anyhow::anyhow!("landing page {landing_url} unavailable: HTTP 503")));
        }
        Ok(Some(format!("{}.pdf", landing_url.replace("https://doi.org", "https://journals.example.org"))))
    }
}

fn record(kind: SourceKind, ids: ExternalIdentifierSet, title: &str) -> SourceRecord {
    let mut rec = SourceRecord::new(kind);
    rec.identifiers = ids;
    rec.title = title.to_string();
    rec
}

fn ids(doi: Option<&str>, pmid: Option<&str>, pmc: Option<&str>) -> ExternalIdentifierSet {
    ExternalIdentifierSet {
        doi: doi.map(String::from),
        pubmed_id: pmid.map(String::from),
        pmc_id: pmc.map(String::from),
        ..Default::default()
    }
}

fn s2_paper(id: &str, doi: &str, title: &str, pdf: Option<&str>) -> SourceRecord {
    let mut rec = record(
        SourceKind::SemanticScholar,
        ExternalIdentifierSet {
            source_system_id: Some(id.to_string()),
            doi: Some(doi.to_string()),
            ..Default::default()
        },
        title,
    );
    rec.open_access_pdf = pdf.map(String::from);
    rec
}

fn orchestrator() -> (Arc<MemoryStore>, IngestionOrchestrator) {
    let store = Arc::new(MemoryStore::new());
    let orch = IngestionOrchestrator::new(store.clone(), vec!["endometriosis".to_string()])
        .with_embedder(Arc::new(ConstantEmbedder));
    (store, orch)
}

// ── semantic-scholar ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_semantic_scholar_run_records_mapping_failures() {
    let (store, orch) = orchestrator();
    let s2 = ScriptedSource {
        ids: vec!["S1".into(), "S2".into()],
        records: vec![
            s2_paper("S1", "10.1/a", "Endometriosis review", Some("https://x.org/a.pdf")),
            s2_paper("S2", "10.1/b", "Endometriosis without pdf", None),
        ],
        ..Default::default()
    };

    let summary = orch.run_semantic_scholar(&s2, "Jane+Doe").await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].kind, ErrorKind::Validation);
    assert!(summary.is_success());

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].primary_link, "https://x.org/a.pdf");
}

#[tokio::test]
async fn test_author_without_papers_is_an_empty_successful_run() {
    let (store, orch) = orchestrator();
    let summary = orch.run_semantic_scholar(&ScriptedSource::default(), "Nobody").await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert!(summary.is_success());
    assert_eq!(store.record_count().await.unwrap(), 0);
}

// ── hybrid ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hybrid_run() {
    let (store, orch) = orchestrator();
    store
        .insert(&RecordCandidate::new(ids(Some("10.1/e"), None, None), "Endometriosis E", "https://doi.org/10.1/e"))
        .await
        .unwrap();

    let pubmed = ScriptedSource {
        ids: vec!["11".into()],
        records: vec![
            record(SourceKind::PubMed, ids(Some("10.1/a"), Some("11"), None), "Endometriosis A"),
            record(SourceKind::PubMed, ids(None, Some("12"), None), "Endometriosis without doi"),
            record(SourceKind::PubMed, ids(Some("10.1/c"), Some("13"), None), "Endometriosis C"),
            record(SourceKind::PubMed, ids(Some("10.1/d"), Some("14"), None), "Endometriosis D"),
            record(SourceKind::PubMed, ids(Some("10.1/e"), Some("15"), None), "Endometriosis E"),
            record(SourceKind::PubMed, ids(Some("10.1/f"), Some("16"), None), "Asthma F"),
        ],
        ..Default::default()
    };
    let s2 = ScriptedSource {
        by_doi: HashMap::from([
            ("10.1/a".to_string(), s2_paper("SA", "10.1/a", "Endometriosis A (S2)", Some("https://x.org/a.pdf"))),
            ("10.1/c".to_string(), s2_paper("SC", "10.1/c", "Endometriosis C", None)),
        ]),
        ..Default::default()
    };

    let summary = orch.run_hybrid(&pubmed, &s2, "Jane Doe").await.unwrap();
    // off-topic, missing doi, already stored
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.created, 1);
    let kinds: Vec<ErrorKind> = summary.failures.iter().map(|f| f.kind).collect();
    assert_eq!(kinds, [ErrorKind::Validation, ErrorKind::NoResults]);

    let merged = store.find_by_identifiers(&ids(Some("10.1/a"), None, None)).await.unwrap().unwrap();
    assert_eq!(merged.title, "Endometriosis A (S2)");
    assert_eq!(merged.identifiers.source_system_id.as_deref(), Some("SA"));
    assert_eq!(merged.identifiers.pubmed_id.as_deref(), Some("11"));
    assert_eq!(merged.primary_link, "https://x.org/a.pdf");
}

#[tokio::test]
async fn test_hybrid_aborts_on_upstream_outage() {
    let (store, orch) = orchestrator();
    let pubmed = ScriptedSource {
        ids: vec!["11".into()],
        records: vec![record(SourceKind::PubMed, ids(Some("10.1/a"), Some("11"), None), "Endometriosis A")],
        ..Default::default()
    };
    let s2 = ScriptedSource { outage_on_doi: Some("10.1/a".into()), ..Default::default() };

    let err = orch.run_hybrid(&pubmed, &s2, "Jane Doe").await.unwrap_err();
    assert!(err.is_run_fatal());
    assert_eq!(store.record_count().await.unwrap(), 0);
}

// ── full-text ─────────────────────────────────────────────────────────────────

fn pmc_source() -> ScriptedSource {
    let body = PaperBody {
        identifiers: ids(Some("10.1/a"), Some("11"), Some("PMC1")),
        sections: vec![SectionNode::with_paragraphs(["Endometriosis lesions &#8805;&#8201;5 mm\nwere excised."])
            .with_child(SectionNode::with_paragraphs(["Pain scores fell [,]."]))],
    };
    ScriptedSource {
        ids: vec!["1".into(), "2".into(), "3".into()],
        records: vec![
            record(SourceKind::Pmc, ids(Some("10.1/a"), Some("11"), Some("PMC1")), "Endometriosis surgery"),
            record(SourceKind::Pmc, ids(None, Some("12"), Some("PMC2")), "Endometriosis imaging"),
            record(SourceKind::Pmc, ids(None, Some("13"), Some("PMC3")), "Asthma in adults"),
        ],
        bodies: vec![body],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_full_text_run_stores_normalised_text_units() {
    let (store, orch) = orchestrator();
    let summary = orch.run_full_text(&pmc_source(), "Jane Doe").await.unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.text_units_inserted, 1);
    assert!(summary.failures.is_empty());

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].primary_link, "https://doi.org/10.1/a");

    let units = store.text_units_for(records[0].id).await;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].text, "Endometriosis lesions ≥ 5 mm were excised. Pain scores fell .");
    assert_eq!(units[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));
    assert_eq!(units[0].metadata.source, "pubmed-script");
    assert_eq!(units[0].metadata.pmc_id.as_deref(), Some("PMC1"));
    assert_eq!(units[0].metadata.title, "Endometriosis surgery");
}

#[tokio::test]
async fn test_full_text_rerun_is_idempotent() {
    let (store, orch) = orchestrator();
    orch.run_full_text(&pmc_source(), "Jane Doe").await.unwrap();
    let again = orch.run_full_text(&pmc_source(), "Jane Doe").await.unwrap();

    assert_eq!(again.created, 0);
    assert_eq!(again.existing, 1);
    assert_eq!(again.text_units_inserted, 0);
    assert_eq!(store.record_count().await.unwrap(), 1);
    let id = store.records().await[0].id;
    assert_eq!(store.text_units_for(id).await.len(), 1);
}

#[tokio::test]
async fn test_full_text_aborts_when_store_connection_drops() {
    let store = Arc::new(DroppedOnTextUnits(MemoryStore::new()));
    let orch = IngestionOrchestrator::new(store.clone(), vec!["endometriosis".to_string()])
        .with_embedder(Arc::new(ConstantEmbedder));

    let err = orch.run_full_text(&pmc_source(), "Jane Doe").await.unwrap_err();
    assert!(err.is_run_fatal());
    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert!(err.to_string().contains("database"));
}

// ── backfill-links ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_backfill_links() {
    let (store, orch) = orchestrator();
    let a = store
        .insert(&RecordCandidate::new(ids(Some("10.1/a"), None, None), "Endometriosis A", "https://doi.org/10.1/a"))
        .await
        .unwrap();
    store
        .insert(&RecordCandidate::new(ids(Some("10.1/b"), None, None), "Endometriosis B", "https://doi.org/10.1/b"))
        .await
        .unwrap();
    store
        .insert(&RecordCandidate::new(ids(None, Some("3"), None), "Endometriosis C", "https://pubmed.ncbi.nlm.nih.gov/3"))
        .await
        .unwrap();

    let summary = orch.backfill_links(&FixedResolver).await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.links_resolved, 1);

    let stored = store.find_by_identifiers(&a.identifiers).await.unwrap().unwrap();
    assert_eq!(stored.resolved_link.as_deref(), Some("https://journals.example.org/a.pdf"));
    assert_eq!(stored.primary_link, "https://doi.org/10.1/a");

    // resolved records are not visited again
    let again = orch.backfill_links(&FixedResolver).await.unwrap();
    assert_eq!(again.skipped, 1);
    assert_eq!(again.attempted, 1);
}

#[tokio::test]
async fn test_backfill_continues_past_unavailable_landing_page() {
    let (store, orch) = orchestrator();
    for doi in ["10.1/a", "10.1/b"] {
        store
            .insert(&RecordCandidate::new(ids(Some(doi), None, None), "Endometriosis", &format!("https://doi.org/{doi}")))
            .await
            .unwrap();
    }

    let summary = orch.backfill_links(&PartlyDownResolver).await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.links_resolved, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].kind, ErrorKind::Other);

    let b = store.find_by_identifiers(&ids(Some("10.1/b"), None, None)).await.unwrap().unwrap();
    assert_eq!(b.resolved_link.as_deref(), Some("https://journals.example.org/10.1/b.pdf"));
}

// ── dedupe ────────────────────────────────────────────────────────────────────

fn item(key: &str, vector: Option<Vec<f32>>) -> TextItem<String> {
    TextItem { key: key.to_string(), text: format!("text {key}"), vector }
}

#[tokio::test]
async fn test_dedupe_embeds_missing_vectors() {
    let (_store, orch) = orchestrator();
    let items = vec![
        item("0", Some(vec![1.0, 0.0])),
        item("1", Some(vec![1.0, 0.0])),
        item("2", Some(vec![0.0, 1.0])),
        item("3", None),
    ];
    let report = orch.dedupe(items, 0.9).await.unwrap();
    assert_eq!(report.clusters.len(), 1);
    assert_eq!(report.clusters[0].representative, "0");
    assert_eq!(report.clusters[0].members, ["0", "1", "3"]);
    assert_eq!(report.redundant_keys, ["1", "3"]);
}

#[tokio::test]
async fn test_dedupe_without_backend_needs_vectors() {
    let store = Arc::new(MemoryStore::new());
    let orch = IngestionOrchestrator::new(store, vec![]);

    let err = orch.dedupe(vec![item("0", None)], 0.9).await.unwrap_err();
    assert!(matches!(err, LitmergeError::Config(_)));

    let report = orch
        .dedupe(vec![item("0", Some(vec![1.0, 0.0])), item("1", Some(vec![0.0, 1.0]))], 0.9)
        .await
        .unwrap();
    assert!(report.clusters.is_empty());
}
