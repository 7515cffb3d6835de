//! Full-text ingestion against the live NCBI E-utilities.
//!
//! Run with: cargo test --package litmerge-ingestion --test test_pubmed_ingestion -- --ignored --nocapture

use std::sync::Arc;

use litmerge_common::{Pacing, SandboxClient};
use litmerge_db::{CorpusStore, MemoryStore};
use litmerge_ingestion::sources::pubmed::{PubMedClient, PubMedDatabase};
use litmerge_ingestion::sources::SourceFetcher;
use litmerge_ingestion::IngestionOrchestrator;

#[tokio::test]
#[ignore] // Requires network access
async fn test_pmc_full_text_run() {
    let client = SandboxClient::new("pmc").unwrap().with_pacing(Pacing::new(400, 800));
    let pmc = PubMedClient::new(client, PubMedDatabase::Pmc, None, 5);

    let ids = pmc.search_by_author("Zondervan KT").await.expect("PMC search failed");
    println!("Found {} PMC ids", ids.len());

    let store = Arc::new(MemoryStore::new());
    let orch = IngestionOrchestrator::new(store.clone(), vec!["endometriosis".to_string()]);
    let summary = orch.run_full_text(&pmc, "Zondervan KT").await.unwrap();

    println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    assert!(summary.is_success());
    assert_eq!(store.record_count().await.unwrap(), summary.created);
}
