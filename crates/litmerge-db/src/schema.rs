//! Record schemas for the canonical corpus.

use chrono::{DateTime, Utc};
use litmerge_common::ExternalIdentifierSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TABLE_RECORDS: &str = "canonical_records";
pub const TABLE_TEXT_UNITS: &str = "text_units";

/// The single deduplicated representation of one external work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: Uuid,
    pub identifiers: ExternalIdentifierSet,
    pub title: String,
    pub primary_link: String,
    /// Recoverable full-text link; the only field that may be back-filled.
    pub resolved_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate for insertion, as produced by the source mappers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordCandidate {
    pub identifiers: ExternalIdentifierSet,
    pub title: String,
    pub primary_link: String,
}

impl RecordCandidate {
    pub fn new(identifiers: ExternalIdentifierSet, title: impl Into<String>, primary_link: impl Into<String>) -> Self {
        Self {
            identifiers,
            title: title.into(),
            primary_link: primary_link.into(),
        }
    }
}

/// Fields that may be updated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    ResolvedLink,
}

impl RecordField {
    pub fn column(&self) -> &'static str {
        match self {
            RecordField::ResolvedLink => "resolved_link",
        }
    }
}

/// Provenance carried alongside each stored text unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextUnitMetadata {
    pub title: String,
    pub pmc_id: Option<String>,
    pub pubmed_id: Option<String>,
    pub doi: Option<String>,
    pub source: String,
}

/// One retrievable chunk of a record's body text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnitRecord {
    pub id: Uuid,
    pub record_id: Uuid,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: TextUnitMetadata,
    pub created_at: DateTime<Utc>,
}
