//! Flattens a section tree into plain text.
//!
//! Order is depth-first: a section's own paragraphs first, then each child
//! section in document order. Non-empty segments are joined with a blank line.

use crate::models::SectionNode;

pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Text of one section and all its descendants. `None` yields an empty string.
pub fn extract(root: Option<&SectionNode>) -> String {
    let Some(node) = root else {
        return String::new();
    };

    let mut segments: Vec<String> = Vec::new();
    for unit in &node.paragraphs {
        let text = unit.to_text();
        if !text.is_empty() {
            segments.push(text);
        }
    }
    for child in &node.children {
        let text = extract(Some(child));
        if !text.is_empty() {
            segments.push(text);
        }
    }
    segments.join(SEGMENT_SEPARATOR)
}

/// Text of a whole body: every top-level section in order, same joining rules.
pub fn extract_body(sections: &[SectionNode]) -> String {
    sections
        .iter()
        .map(|s| extract(Some(s)))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR)
}
