//! In-process corpus store.
//!
//! Keeps records and text units in insertion order so every lookup is
//! deterministic. Enforces the same identifier uniqueness as the PostgreSQL
//! partial unique indexes.

use async_trait::async_trait;
use chrono::Utc;
use litmerge_common::ExternalIdentifierSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::schema::{CanonicalRecord, RecordCandidate, RecordField, TextUnitRecord};
use crate::store::CorpusStore;

#[derive(Default)]
struct Inner {
    records: Vec<CanonicalRecord>,
    text_units: Vec<TextUnitRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_by_identifiers` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub async fn records(&self) -> Vec<CanonicalRecord> {
        self.inner.read().await.records.clone()
    }

    pub async fn text_units_for(&self, record_id: Uuid) -> Vec<TextUnitRecord> {
        self.inner
            .read()
            .await
            .text_units
            .iter()
            .filter(|u| u.record_id == record_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CorpusStore for MemoryStore {
    async fn find_by_identifiers(&self, ids: &ExternalIdentifierSet) -> Result<Option<CanonicalRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .find(|r| r.identifiers.shares_any(ids))
            .cloned())
    }

    async fn insert(&self, candidate: &RecordCandidate) -> Result<CanonicalRecord> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.records.iter().find(|r| r.identifiers.shares_any(&candidate.identifiers)) {
            return Err(DbError::Duplicate(format!(
                "record {} already holds one of [{}]",
                existing.id,
                candidate.identifiers.describe()
            )));
        }

        let now = Utc::now();
        let record = CanonicalRecord {
            id: Uuid::new_v4(),
            identifiers: candidate.identifiers.clone(),
            title: candidate.title.clone(),
            primary_link: candidate.primary_link.clone(),
            resolved_link: None,
            created_at: now,
            updated_at: now,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn update_field(&self, id: Uuid, field: RecordField, value: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DbError::NotFound(format!("record {id}")))?;
        match field {
            RecordField::ResolvedLink => record.resolved_link = Some(value.to_string()),
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn exists_for_record(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.read().await.text_units.iter().any(|u| u.record_id == id))
    }

    async fn insert_text_unit(&self, unit: &TextUnitRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.records.iter().any(|r| r.id == unit.record_id) {
            return Err(DbError::NotFound(format!("record {}", unit.record_id)));
        }
        inner.text_units.push(unit.clone());
        Ok(())
    }

    async fn list_by_link_prefix(&self, prefix: &str) -> Result<Vec<CanonicalRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.primary_link.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn record_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TextUnitMetadata;

    fn candidate(doi: &str, pmid: &str) -> RecordCandidate {
        RecordCandidate::new(
            ExternalIdentifierSet {
                doi: Some(doi.to_string()),
                pubmed_id: Some(pmid.to_string()),
                ..Default::default()
            },
            "Endometriosis and pelvic pain",
            format!("https://doi.org/{doi}"),
        )
    }

    #[tokio::test]
    async fn test_insert_rejects_shared_identifier() {
        let store = MemoryStore::new();
        store.insert(&candidate("10.1/a", "1")).await.unwrap();
        let err = store.insert(&candidate("10.1/b", "1")).await.unwrap_err();
        assert!(matches!(err, DbError::Duplicate(_)));
        assert_eq!(store.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_resolved_link() {
        let store = MemoryStore::new();
        let rec = store.insert(&candidate("10.1/a", "1")).await.unwrap();
        store.update_field(rec.id, RecordField::ResolvedLink, "https://x.org/a.pdf").await.unwrap();
        let stored = store.find_by_identifiers(&rec.identifiers).await.unwrap().unwrap();
        assert_eq!(stored.resolved_link.as_deref(), Some("https://x.org/a.pdf"));
        assert_eq!(stored.title, rec.title);

        let missing = store.update_field(Uuid::new_v4(), RecordField::ResolvedLink, "x").await;
        assert!(matches!(missing, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_text_unit_existence() {
        let store = MemoryStore::new();
        let rec = store.insert(&candidate("10.1/a", "1")).await.unwrap();
        assert!(!store.exists_for_record(rec.id).await.unwrap());

        store.insert_text_unit(&TextUnitRecord {
            id: Uuid::new_v4(),
            record_id: rec.id,
            chunk_index: 0,
            text: "body".into(),
            embedding: None,
            metadata: TextUnitMetadata::default(),
            created_at: Utc::now(),
        }).await.unwrap();
        assert!(store.exists_for_record(rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_link_prefix() {
        let store = MemoryStore::new();
        store.insert(&candidate("10.1/a", "1")).await.unwrap();
        let mut other = candidate("10.1/b", "2");
        other.primary_link = "https://pubmed.ncbi.nlm.nih.gov/2".into();
        store.insert(&other).await.unwrap();

        let hits = store.list_by_link_prefix("https://doi.org").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identifiers.doi.as_deref(), Some("10.1/a"));
    }
}
