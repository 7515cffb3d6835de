//! litmerge Database Layer
//!
//! Persistence for the canonical corpus: canonical records keyed by their
//! external identifiers, and the retrievable text units derived from each
//! record's body.
//!
//! Two implementations share the [`CorpusStore`] trait:
//!
//! - [`MemoryStore`]: ordered, in-process; used by tests and dry runs
//! - [`PgStore`]: PostgreSQL + pgvector, with an explicit connect/close lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use litmerge_db::{CorpusStore, PgStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgStore::connect("postgres://litmerge@localhost/litmerge").await?;
//!     store.initialize().await?;
//!     println!("{} records", store.record_count().await?);
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod schema;
pub mod store;
pub mod memory;
pub mod postgres;

pub use error::{DbError, Result};
pub use schema::{
    CanonicalRecord, RecordCandidate, RecordField, TextUnitMetadata, TextUnitRecord,
    TABLE_RECORDS, TABLE_TEXT_UNITS,
};
pub use store::CorpusStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;
