//! The persistence contract consumed by the reconciliation pipeline.

use async_trait::async_trait;
use litmerge_common::ExternalIdentifierSet;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{CanonicalRecord, RecordCandidate, RecordField, TextUnitRecord};

#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// First record sharing a non-empty value with `ids` in any one identifier field.
    async fn find_by_identifiers(&self, ids: &ExternalIdentifierSet) -> Result<Option<CanonicalRecord>>;

    /// Persist a new record. Fails with `DbError::Duplicate` if an identifier is already taken.
    async fn insert(&self, candidate: &RecordCandidate) -> Result<CanonicalRecord>;

    async fn update_field(&self, id: Uuid, field: RecordField, value: &str) -> Result<()>;

    /// Whether any text unit is stored for the record.
    async fn exists_for_record(&self, id: Uuid) -> Result<bool>;

    async fn insert_text_unit(&self, unit: &TextUnitRecord) -> Result<()>;

    /// Records whose primary link starts with `prefix`, oldest first.
    async fn list_by_link_prefix(&self, prefix: &str) -> Result<Vec<CanonicalRecord>>;

    async fn record_count(&self) -> Result<usize>;
}
