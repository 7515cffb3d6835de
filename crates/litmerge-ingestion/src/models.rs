//! Data models for the ingestion pipeline.

use litmerge_common::{ExternalIdentifierSet, LitmergeError, Result};
use litmerge_db::RecordCandidate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Represents a discovered work as reported by one source, before reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: SourceKind,
    pub identifiers: ExternalIdentifierSet,
    pub title: String,
    pub authors: Vec<Author>,
    pub keywords: Vec<String>,
    pub publication_date: Option<PublicationDate>,
    pub abstract_text: Option<String>,
    pub open_access_pdf: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Author {
    pub name: String,
    pub source_author_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicationDate {
    pub year: String,
    pub month: Option<String>,
    pub day: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PubMed,
    Pmc,
    SemanticScholar,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::PubMed          => "pubmed",
            SourceKind::Pmc             => "pmc",
            SourceKind::SemanticScholar => "semanticscholar",
        }
    }
}

impl SourceRecord {
    pub fn new(source: SourceKind) -> Self {
        Self {
            source,
            identifiers: ExternalIdentifierSet::default(),
            title: String::new(),
            authors: Vec::new(),
            keywords: Vec::new(),
            publication_date: None,
            abstract_text: None,
            open_access_pdf: None,
        }
    }

    /// Map to an insertion candidate.
    ///
    /// Semantic Scholar records are only usable with an open-access PDF, which
    /// becomes the primary link. NCBI records link to the DOI resolver, then
    /// PMC, then PubMed.
    pub fn to_candidate(&self) -> Result<RecordCandidate> {
        let primary_link = match self.source {
            SourceKind::SemanticScholar => self
                .open_access_pdf
                .clone()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    LitmergeError::Validation(format!(
                        "open access PDF URL is required ({})",
                        self.identifiers.describe()
                    ))
                })?,
            SourceKind::PubMed | SourceKind::Pmc => derive_public_link(&self.identifiers),
        };
        Ok(RecordCandidate::new(self.identifiers.clone(), self.title.clone(), primary_link))
    }
}

/// Public landing link for a work: DOI resolver, then PMC, then PubMed.
pub fn derive_public_link(ids: &ExternalIdentifierSet) -> String {
    use litmerge_common::IdField;
    if let Some(doi) = ids.get(IdField::Doi) {
        format!("https://doi.org/{doi}")
    } else if let Some(pmcid) = ids.get(IdField::PmcId) {
        format!("https://pmc.ncbi.nlm.nih.gov/articles/{pmcid}")
    } else if let Some(pmid) = ids.get(IdField::PubmedId) {
        format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}")
    } else {
        String::new()
    }
}

// ── Document body tree ────────────────────────────────────────────────────────

/// One paragraph entry of a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextUnit {
    /// Paragraph without markup.
    Plain(String),
    /// Paragraph that carried markup. Only `text` matters; the rest is ignorable.
    Fragment(Fragment),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// String, number, or nested structure. Absent when the paragraph had no direct text.
    #[serde(default)]
    pub text: Option<serde_json::Value>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl TextUnit {
    /// Plain text of this unit; empty when a fragment carries no usable payload.
    pub fn to_text(&self) -> String {
        match self {
            TextUnit::Plain(s) => s.clone(),
            TextUnit::Fragment(f) => match &f.text {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => v.to_string(),
                Some(serde_json::Value::Bool(_)) | Some(serde_json::Value::Null) | None => String::new(),
            },
        }
    }
}

/// A section of a document body. Owned children make cycles impossible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionNode {
    #[serde(default)]
    pub paragraphs: Vec<TextUnit>,
    #[serde(default)]
    pub children: Vec<SectionNode>,
}

impl SectionNode {
    pub fn with_paragraphs<I, S>(paragraphs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paragraphs: paragraphs.into_iter().map(|p| TextUnit::Plain(p.into())).collect(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: SectionNode) -> Self {
        self.children.push(child);
        self
    }
}

/// A parsed full-text body together with the identifiers found in its front matter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperBody {
    pub identifiers: ExternalIdentifierSet,
    pub sections: Vec<SectionNode>,
}
