//! litmerge-common: shared types, errors, and the paced HTTP client used across all litmerge crates.

pub mod error;
pub mod identifiers;
pub mod sandbox;

// Re-export commonly used types
pub use error::{ErrorKind, LitmergeError, Result};
pub use identifiers::{ExternalIdentifierSet, IdField};
pub use sandbox::{Pacing, SandboxClient};
