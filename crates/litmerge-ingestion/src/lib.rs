//! litmerge-ingestion: bibliographic reconciliation and ingestion pipeline.
//!
//! - Source clients (PubMed / PMC E-utilities, Semantic Scholar)
//! - Identifier reconciliation against the canonical corpus
//! - Section text extraction and entity normalisation
//! - Chunking and embedding of full-text bodies
//! - Embedding-similarity duplicate clustering
//! - Run orchestration and PDF link back-fill

pub mod chunker;
pub mod dedup;
pub mod embedding;
pub mod extract;
pub mod links;
pub mod models;
pub mod normalise;
pub mod pipeline;
pub mod reconcile;
pub mod sources;

pub use dedup::{cluster, cosine_similarity, redundant_keys, DuplicateCluster, EmbeddableItem};
pub use extract::{extract, extract_body};
pub use models::{PaperBody, SectionNode, SourceKind, SourceRecord, TextUnit};
pub use normalise::{normalize, EntityTable};
pub use pipeline::{IngestionOrchestrator, RunSummary};
pub use reconcile::{merge_hybrid, BatchReport, IdentifierReconciler, ItemFailure, Reconciled, TopicGuard};
