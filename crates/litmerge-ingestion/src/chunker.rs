//! Sliding-window chunker for normalised body text.
//!
//! Windows are measured in characters and break on whitespace, so a chunk
//! never splits a word unless the word alone is longer than the window.
//! Consecutive chunks share up to `chunk_overlap` characters of trailing
//! words.

/// Configuration for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters of overlap between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

/// Split text into overlapping chunks in reading order.
pub fn chunk_text(text: &str, config: &ChunkerConfig) -> Vec<TextChunk> {
    let size = config.chunk_size.max(1);
    let overlap = config.chunk_overlap.min(size.saturating_sub(1));

    let words: Vec<&str> = text
        .split_whitespace()
        .flat_map(|w| split_long_word(w, size))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < words.len() {
        // Extend the window while it fits.
        let mut end = start;
        let mut len = 0;
        while end < words.len() {
            let add = char_len(words[end]) + usize::from(end > start);
            if len + add > size && end > start {
                break;
            }
            len += add;
            end += 1;
        }

        chunks.push(TextChunk {
            index: chunks.len(),
            text: words[start..end].join(" "),
        });
        if end == words.len() {
            break;
        }

        // Step back over trailing words that fit in the overlap, always advancing.
        let mut next = end;
        let mut carried = 0;
        while next > start + 1 {
            let add = char_len(words[next - 1]) + usize::from(carried > 0);
            if carried + add > overlap {
                break;
            }
            carried += add;
            next -= 1;
        }
        start = next;
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Hard-split a word longer than the window at char boundaries.
fn split_long_word(word: &str, size: usize) -> Vec<&str> {
    if char_len(word) <= size {
        return vec![word];
    }
    let mut parts = Vec::new();
    let mut rest = word;
    while !rest.is_empty() {
        let cut = rest
            .char_indices()
            .nth(size)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        parts.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    parts
}
