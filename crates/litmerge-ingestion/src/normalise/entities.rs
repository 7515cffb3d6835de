//! Numeric character-reference cleanup.
//!
//! JATS bodies keep numeric references such as `&#8201;` in paragraph text.
//! This module turns the common ones into literal characters and strips the
//! empty citation brackets left behind once `<xref>` markup is dropped.
//!
//! Usage:
//! ```
//! use litmerge_ingestion::normalise::{normalize, EntityTable};
//!
//! assert_eq!(normalize("6&#8211;10&#160;mg"), "6–10 mg");
//!
//! let table = EntityTable::default().with("&#946;", "β");
//! assert_eq!(table.normalize("&#946;-catenin [,]"), "β-catenin");
//! ```

use lazy_static::lazy_static;

/// Default reference → literal pairs. Patterns never overlap, so order among them is irrelevant.
const DEFAULT_ENTITIES: &[(&str, &str)] = &[
    ("&#8201;", " "),  // thin space
    ("&#160;", " "),   // no-break space
    ("&#8211;", "–"),  // en dash
    ("&#8722;", "-"),  // minus sign
    ("&#8805;", "≥"),
    ("&#8804;", "≤"),
    ("&#8806;", "≮"),
    ("&#8807;", "≯"),
    ("&#967;", "χ"),
    ("&#8220;", "\""),
    ("&#8221;", "\""),
    ("&#8217;", "'"),
    ("&#8594;", "→"),
];

/// Citation-bracket remnants removed after substitution.
pub const BRACKET_ARTIFACTS: &[&str] = &["[,,]", "[,]", "[]"];

lazy_static! {
    static ref DEFAULT_TABLE: EntityTable = EntityTable::default();
}

/// An ordered, extensible substitution table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTable {
    entries: Vec<(String, String)>,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self {
            entries: DEFAULT_ENTITIES
                .iter()
                .map(|(r, l)| (r.to_string(), l.to_string()))
                .collect(),
        }
    }
}

impl EntityTable {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add a substitution. Replaces the literal of an existing reference.
    pub fn with(mut self, reference: &str, literal: &str) -> Self {
        match self.entries.iter_mut().find(|(r, _)| r == reference) {
            Some(entry) => entry.1 = literal.to_string(),
            None => self.entries.push((reference.to_string(), literal.to_string())),
        }
        self
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (reference, literal) in &self.entries {
            if out.contains(reference.as_str()) {
                out = out.replace(reference.as_str(), literal);
            }
        }

        out = out.replace('\n', " ");

        // Removing one artifact can expose another ("[[]]" → "[]").
        while let Some(artifact) = BRACKET_ARTIFACTS.iter().find(|a| out.contains(**a)) {
            out = out.replace(artifact, "");
        }

        out.trim().to_string()
    }
}

/// Normalise with the default table.
pub fn normalize(text: &str) -> String {
    DEFAULT_TABLE.normalize(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_substitutions() {
        assert_eq!(
            normalize("p&#8201;&#8804;&#8201;0.05 and &#8220;stage&#8221; &#967;2 &#8594; yes"),
            "p ≤ 0.05 and \"stage\" χ2 → yes"
        );
        assert_eq!(normalize("women&#8217;s 6&#8211;10&#160;years &#8722;1"), "women's 6–10 years -1");
    }

    #[test]
    fn test_line_feeds_and_trim() {
        assert_eq!(normalize("  first\nsecond\n\nthird \n"), "first second  third");
    }

    #[test]
    fn test_bracket_artifacts_removed_everywhere() {
        assert_eq!(normalize("shown [] before [,] and [,,] again []"), "shown  before  and  again");
        assert_eq!(normalize("[[]]"), "");
    }

    #[test]
    fn test_unknown_references_left_alone() {
        assert_eq!(normalize("&#946;-catenin"), "&#946;-catenin");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "a&#8201;b\n[,]c&#8805;d ",
            "\n&#160;&#8211;[]&#8722;\n",
            "[,,][,][]",
            "plain text",
        ];
        for input in inputs {
            let once = normalize(input);
            assert_eq!(normalize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_extended_table() {
        let table = EntityTable::default().with("&#946;", "β").with("&#160;", "_");
        assert_eq!(table.len(), DEFAULT_ENTITIES.len() + 1);
        assert_eq!(table.normalize("&#946;&#160;x"), "β_x");
        assert_eq!(EntityTable::empty().normalize(" &#8201;\n"), "&#8201;");
    }
}
