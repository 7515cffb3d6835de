//! Identifier reconciliation: one canonical record per external work.
//!
//! A candidate matches an existing record when any single identifier field
//! (source system id, DOI, PubMed id, PMC id) is non-empty on both sides and
//! equal. A match is returned unchanged; only unmatched candidates are
//! validated, screened by the topic guard and inserted.

use std::sync::Arc;

use litmerge_common::{ErrorKind, ExternalIdentifierSet, IdField, LitmergeError, Result};
use litmerge_db::{CanonicalRecord, CorpusStore, DbError, RecordCandidate};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

// ── Topic guard ───────────────────────────────────────────────────────────────

/// Accepts a title when it mentions at least one topic keyword (case-insensitive).
/// An empty keyword list accepts everything.
#[derive(Debug, Clone, Default)]
pub struct TopicGuard {
    keywords: Vec<String>,
}

impl TopicGuard {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn accepts(&self, title: &str) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let title = title.trim().to_lowercase();
        self.keywords.iter().any(|k| title.contains(k.as_str()))
    }
}

// ── Pure validation ───────────────────────────────────────────────────────────

pub fn validate_identifiers(ids: &ExternalIdentifierSet) -> Result<()> {
    if ids.is_empty() {
        return Err(LitmergeError::Validation("at least one external identifier is required".into()));
    }
    Ok(())
}

/// Full pre-insert check of a candidate: identifiers, title, topic guard.
pub fn validate_candidate(candidate: &RecordCandidate, guard: &TopicGuard) -> Result<()> {
    validate_identifiers(&candidate.identifiers)?;
    if candidate.title.trim().is_empty() {
        return Err(LitmergeError::Validation(format!(
            "title is required ({})",
            candidate.identifiers.describe()
        )));
    }
    if !guard.accepts(&candidate.title) {
        return Err(LitmergeError::ContentRejected(format!(
            "title does not match any topic keyword: {:?}",
            candidate.title
        )));
    }
    Ok(())
}

/// Field-by-field merge of two descriptions of the same work.
/// `preferred` wins wherever it has a non-empty value.
pub fn merge_hybrid(preferred: &RecordCandidate, fallback: &RecordCandidate) -> RecordCandidate {
    let mut identifiers = ExternalIdentifierSet::default();
    for field in IdField::ALL {
        let value = preferred
            .identifiers
            .get(field)
            .or_else(|| fallback.identifiers.get(field))
            .map(String::from);
        identifiers.set(field, value);
    }
    let pick = |a: &str, b: &str| if a.trim().is_empty() { b.to_string() } else { a.to_string() };
    RecordCandidate {
        identifiers,
        title: pick(&preferred.title, &fallback.title),
        primary_link: pick(&preferred.primary_link, &fallback.primary_link),
    }
}

// ── Outcomes and reports ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    Created(CanonicalRecord),
    Existing(CanonicalRecord),
}

impl Reconciled {
    pub fn record(&self) -> &CanonicalRecord {
        match self {
            Reconciled::Created(r) | Reconciled::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> CanonicalRecord {
        match self {
            Reconciled::Created(r) | Reconciled::Existing(r) => r,
        }
    }

    pub fn was_new(&self) -> bool {
        matches!(self, Reconciled::Created(_))
    }
}

/// One candidate that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub identity: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(identity: impl Into<String>, err: &LitmergeError) -> Self {
        Self { identity: identity.into(), kind: err.kind(), message: err.to_string() }
    }
}

/// Outcome of a batch: successes in input order plus per-item failures.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub attempted: usize,
    pub records: Vec<Reconciled>,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    pub fn created(&self) -> usize {
        self.records.iter().filter(|r| r.was_new()).count()
    }
}

// ── Reconciler ────────────────────────────────────────────────────────────────

pub struct IdentifierReconciler {
    store: Arc<dyn CorpusStore>,
    guard: TopicGuard,
}

impl IdentifierReconciler {
    pub fn new(store: Arc<dyn CorpusStore>, guard: TopicGuard) -> Self {
        Self { store, guard }
    }

    pub fn guard(&self) -> &TopicGuard {
        &self.guard
    }

    /// First record sharing any identifier. An empty set never reaches the store.
    pub async fn find_match(&self, ids: &ExternalIdentifierSet) -> Result<Option<CanonicalRecord>> {
        if ids.is_empty() {
            return Ok(None);
        }
        Ok(self.store.find_by_identifiers(ids).await?)
    }

    /// Return the matching record, or validate and insert the candidate.
    #[instrument(skip(self, candidate), fields(ids = %candidate.identifiers.describe()))]
    pub async fn create_or_get(&self, candidate: &RecordCandidate) -> Result<Reconciled> {
        validate_identifiers(&candidate.identifiers)?;

        if let Some(existing) = self.find_match(&candidate.identifiers).await? {
            debug!(record_id = %existing.id, "Matched existing record");
            return Ok(Reconciled::Existing(existing));
        }

        validate_candidate(candidate, &self.guard)?;

        match self.store.insert(candidate).await {
            Ok(record) => {
                debug!(record_id = %record.id, "Created record");
                Ok(Reconciled::Created(record))
            }
            // Another writer took one of the identifiers between lookup and insert.
            Err(DbError::Duplicate(msg)) => match self.find_match(&candidate.identifiers).await? {
                Some(existing) => Ok(Reconciled::Existing(existing)),
                None => Err(LitmergeError::Conflict(msg)),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Reconcile candidates one at a time in input order.
    ///
    /// Per-item failures are recorded and skipped. A run-fatal error (an
    /// unreachable upstream or database) stops the batch and is returned.
    #[instrument(skip(self, candidates), fields(n = candidates.len()))]
    pub async fn create_or_get_batch(&self, candidates: &[RecordCandidate]) -> Result<BatchReport> {
        let mut report = BatchReport { attempted: candidates.len(), ..Default::default() };

        for candidate in candidates {
            match self.create_or_get(candidate).await {
                Ok(outcome) => report.records.push(outcome),
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    let identity = candidate_identity(candidate);
                    warn!(identity = %identity, kind = %e.kind(), error = %e, "Candidate not reconciled");
                    report.failures.push(ItemFailure::new(identity, &e));
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded(),
            created = report.created(),
            failed = report.failures.len(),
            "Batch reconciled"
        );
        Ok(report)
    }
}

/// Human-readable identity for reports: identifiers, else the title.
pub fn candidate_identity(candidate: &RecordCandidate) -> String {
    if candidate.identifiers.is_empty() {
        format!("title={:?}", candidate.title)
    } else {
        candidate.identifiers.describe()
    }
}
