//! Literature source clients.

pub mod jats;
pub mod pubmed;
pub mod semantic_scholar;

use async_trait::async_trait;
use litmerge_common::{LitmergeError, Result};

use crate::models::{PaperBody, SourceRecord};

/// Common interface for all literature source clients.
///
/// An empty search is reported as `LitmergeError::NoResults`, never as an
/// empty list, so callers can tell it apart from transport failures.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Source-native ids of works by the named author.
    async fn search_by_author(&self, name: &str) -> Result<Vec<String>>;

    async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<SourceRecord>>;

    /// Full-text bodies. Sources without full text return an empty list.
    async fn fetch_bodies_by_ids(&self, ids: &[String]) -> Result<Vec<PaperBody>>;

    /// Look a single work up by DOI.
    async fn fetch_by_doi(&self, doi: &str) -> Result<SourceRecord> {
        Err(LitmergeError::NoResults(format!("{} has no DOI lookup ({doi})", self.name())))
    }
}

/// Lower-cased bare DOI: strips resolver prefixes and a `doi:` scheme.
pub fn clean_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"] {
        if doi.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            doi = doi[prefix.len()..].trim();
        }
    }
    (!doi.is_empty()).then(|| doi.to_ascii_lowercase())
}

/// PMC id in `PMC<digits>` form, whether or not the source included the prefix.
pub fn clean_pmcid(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() {
        return None;
    }
    let digits = id
        .strip_prefix("PMC")
        .or_else(|| id.strip_prefix("pmc"))
        .unwrap_or(id);
    Some(format!("PMC{digits}"))
}

/// Keep records whose title or keywords mention any topic keyword (case-insensitive).
pub fn matches_topic(record: &SourceRecord, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = record
        .keywords
        .iter()
        .chain(std::iter::once(&record.title))
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    keywords.iter().any(|k| haystack.contains(&k.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    #[test]
    fn test_clean_doi() {
        assert_eq!(clean_doi(" https://doi.org/10.1016/J.X.2020 ").as_deref(), Some("10.1016/j.x.2020"));
        assert_eq!(clean_doi("doi:10.1/ABC").as_deref(), Some("10.1/abc"));
        assert_eq!(clean_doi("  "), None);
    }

    #[test]
    fn test_clean_pmcid() {
        assert_eq!(clean_pmcid("12345").as_deref(), Some("PMC12345"));
        assert_eq!(clean_pmcid("PMC12345").as_deref(), Some("PMC12345"));
        assert_eq!(clean_pmcid(""), None);
    }

    #[test]
    fn test_topic_filter_checks_title_and_keywords() {
        let mut rec = SourceRecord::new(SourceKind::Pmc);
        rec.title = "Pelvic pain in adolescents".into();
        let kw = vec!["endometriosis".to_string()];
        assert!(!matches_topic(&rec, &kw));
        rec.keywords = vec!["Endometriosis".into()];
        assert!(matches_topic(&rec, &kw));
        assert!(matches_topic(&SourceRecord::new(SourceKind::Pmc), &[]));
    }
}
