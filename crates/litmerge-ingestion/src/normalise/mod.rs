//! Text normalisation applied to extracted body text.
//!
//! - `EntityTable`: declared numeric-reference → literal substitutions
//! - `normalize`: one generic pass over a table, plus line-feed and
//!   bracket-artifact cleanup

pub mod entities;

pub use entities::{normalize, EntityTable, BRACKET_ARTIFACTS};
