//! Near-duplicate detection over embedded text items.
//!
//! Grouping is single-seed greedy: items are visited in input order, each
//! unassigned item seeds a cluster, and every later unassigned item whose
//! cosine similarity *to the seed* is at least the threshold joins it.
//! Members are never compared with each other, so the relation is not
//! transitive: with seed A, B may join (sim(A,B) ≥ t) and C may not
//! (sim(A,C) < t) even when sim(B,C) ≥ t. C then seeds its own cluster.
//! Changing this to transitive closure changes which keys are reported
//! redundant.

use litmerge_common::{LitmergeError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::embedding::EmbeddingProvider;

/// A keyed text with its embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddableItem<K> {
    pub key: K,
    pub text: String,
    pub vector: Vec<f32>,
}

/// An input item whose vector may still need computing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem<K> {
    pub key: K,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

/// Two or more items judged near-duplicates. `members[0]` is the representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster<K> {
    pub representative: K,
    pub members: Vec<K>,
}

impl<K> DuplicateCluster<K> {
    /// Members other than the representative, in input order.
    pub fn redundant(&self) -> &[K] {
        &self.members[1..]
    }
}

/// Cosine similarity. Zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(LitmergeError::DimensionMismatch { expected: a.len(), actual: b.len() });
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Group items into duplicate clusters. Singletons are not returned.
#[instrument(skip(items), fields(n = items.len()))]
pub fn cluster<K: Clone>(items: &[EmbeddableItem<K>], threshold: f64) -> Result<Vec<DuplicateCluster<K>>> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(LitmergeError::Validation(format!(
            "similarity threshold must be in (0, 1], got {threshold}"
        )));
    }
    let Some(first) = items.first() else {
        return Ok(Vec::new());
    };
    let dim = first.vector.len();
    if let Some(bad) = items.iter().find(|it| it.vector.len() != dim) {
        return Err(LitmergeError::DimensionMismatch { expected: dim, actual: bad.vector.len() });
    }

    let mut assigned = vec![false; items.len()];
    let mut clusters = Vec::new();

    for i in 0..items.len() {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let mut members = vec![i];

        for j in (i + 1)..items.len() {
            if assigned[j] {
                continue;
            }
            if cosine_similarity(&items[i].vector, &items[j].vector)? >= threshold {
                assigned[j] = true;
                members.push(j);
            }
        }

        if members.len() > 1 {
            clusters.push(DuplicateCluster {
                representative: items[i].key.clone(),
                members: members.iter().map(|&m| items[m].key.clone()).collect(),
            });
        }
    }

    debug!(clusters = clusters.len(), "Clustering complete");
    Ok(clusters)
}

/// Non-representative keys of every cluster, in cluster order.
pub fn redundant_keys<K: Clone>(clusters: &[DuplicateCluster<K>]) -> Vec<K> {
    clusters.iter().flat_map(|c| c.redundant().iter().cloned()).collect()
}

/// Fill in missing vectors with one provider call, preserving input order.
pub async fn embed_missing<K>(
    provider: &dyn EmbeddingProvider,
    items: Vec<TextItem<K>>,
) -> Result<Vec<EmbeddableItem<K>>> {
    let pending: Vec<String> = items
        .iter()
        .filter(|it| it.vector.is_none())
        .map(|it| it.text.clone())
        .collect();

    let mut fresh = if pending.is_empty() {
        Vec::new()
    } else {
        provider.embed(&pending).await?
    };
    if fresh.len() != pending.len() {
        return Err(LitmergeError::Other(anyhow::anyhow!(
            "embedding provider returned {} vectors for {} texts",
            fresh.len(),
            pending.len()
        )));
    }
    fresh.reverse();

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let vector = match item.vector {
            Some(v) => v,
            None => fresh.pop().unwrap_or_default(),
        };
        out.push(EmbeddableItem { key: item.key, text: item.text, vector });
    }
    Ok(out)
}
