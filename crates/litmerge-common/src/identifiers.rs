//! External identifiers for one bibliographic work.

use serde::{Deserialize, Serialize};

/// Identifier fields, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdField {
    SourceSystemId,
    Doi,
    PubmedId,
    PmcId,
}

impl IdField {
    pub const ALL: [IdField; 4] = [
        IdField::SourceSystemId,
        IdField::Doi,
        IdField::PubmedId,
        IdField::PmcId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdField::SourceSystemId => "source_system_id",
            IdField::Doi            => "doi",
            IdField::PubmedId       => "pubmed_id",
            IdField::PmcId          => "pmc_id",
        }
    }
}

/// Unordered bag of typed identifiers. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentifierSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubmed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmc_id: Option<String>,
}

impl ExternalIdentifierSet {
    /// Non-empty value of one field, whitespace-trimmed.
    pub fn get(&self, field: IdField) -> Option<&str> {
        let raw = match field {
            IdField::SourceSystemId => self.source_system_id.as_deref(),
            IdField::Doi            => self.doi.as_deref(),
            IdField::PubmedId       => self.pubmed_id.as_deref(),
            IdField::PmcId          => self.pmc_id.as_deref(),
        };
        raw.map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: IdField, value: Option<String>) {
        let slot = match field {
            IdField::SourceSystemId => &mut self.source_system_id,
            IdField::Doi            => &mut self.doi,
            IdField::PubmedId       => &mut self.pubmed_id,
            IdField::PmcId          => &mut self.pmc_id,
        };
        *slot = value;
    }

    /// All present `(field, value)` pairs in `IdField::ALL` order.
    pub fn present(&self) -> Vec<(IdField, &str)> {
        IdField::ALL
            .iter()
            .filter_map(|f| self.get(*f).map(|v| (*f, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }

    /// Field-wise match: at least one field carries the same non-empty value on both sides.
    pub fn shares_any(&self, other: &ExternalIdentifierSet) -> bool {
        IdField::ALL.iter().any(|f| match (self.get(*f), other.get(*f)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }

    /// Short human-readable identity for logs and batch reports.
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .present()
            .into_iter()
            .map(|(f, v)| format!("{}={}", f.as_str(), v))
            .collect();
        if parts.is_empty() {
            "<no identifiers>".to_string()
        } else {
            parts.join(", ")
        }
    }
}
