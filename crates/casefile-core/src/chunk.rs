//! Overlapping, boundary-aware text chunker.
//!
//! Splits evidence text into passages of at most `max_chunk_chars`
//! characters. Each passage is an exact slice of the source text, and
//! consecutive passages share exactly `overlap_chars` characters so that
//! context at a boundary is visible to both sides.
//!
//! # Algorithm
//!
//! 1. If the remaining text fits in `max_chunk_chars`, emit it and stop.
//! 2. Otherwise take the window of the next `max_chunk_chars` characters.
//! 3. Cut after the last separator in the window, trying in order:
//!    paragraph (`\n\n`), line (`\n`), sentence (`. `, `! `, `? `), word (` `).
//!    A cut is only accepted if the passage is longer than the overlap,
//!    which guarantees forward progress.
//! 4. If no separator qualifies, hard-cut at the window end.
//! 5. The next passage starts `overlap_chars` characters before the cut.
//!
//! Offsets are byte offsets that always fall on UTF-8 char boundaries.
//!
//! # Example
//!
//! ```rust
//! use casefile_core::chunk::chunk;
//!
//! let spans = chunk("Hello world.\n\nSecond paragraph.", 500, 50);
//! assert_eq!(spans.len(), 1);
//! assert_eq!(spans[0].start_offset, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split points, highest priority first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// A passage of the source text with its byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan<'a> {
    pub text: &'a str,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Split `raw_text` into ordered, overlapping passages.
///
/// # Guarantees
///
/// - Passages are in document order and never empty.
/// - `start_offset < end_offset` for every passage.
/// - Consecutive passages overlap by exactly `overlap_chars` characters
///   (clamped below `max_chunk_chars`), and together cover the whole text.
/// - Identical input and parameters always yield identical output.
///
/// Empty input (or `max_chunk_chars == 0`) yields no passages.
pub fn chunk(raw_text: &str, max_chunk_chars: usize, overlap_chars: usize) -> Vec<TextSpan<'_>> {
    if raw_text.is_empty() || max_chunk_chars == 0 {
        return Vec::new();
    }
    let overlap = overlap_chars.min(max_chunk_chars - 1);

    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = match raw_text[start..].char_indices().nth(max_chunk_chars) {
            Some((i, _)) => start + i,
            None => {
                spans.push(span(raw_text, start, raw_text.len()));
                break;
            }
        };

        let min_end = advance_chars(raw_text, start, overlap + 1);
        let end = find_split(raw_text, start, min_end, hard_end).unwrap_or(hard_end);
        spans.push(span(raw_text, start, end));

        start = retreat_chars(raw_text, end, overlap);
    }

    spans
}

/// Chunk a document's text into [`Chunk`] records with stable ids and
/// content hashes. Embeddings are left unset.
pub fn build_chunks(
    document_id: &str,
    raw_text: &str,
    max_chunk_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    chunk(raw_text, max_chunk_chars, overlap_chars)
        .into_iter()
        .enumerate()
        .map(|(i, s)| Chunk {
            id: Chunk::make_id(document_id, i),
            document_id: document_id.to_string(),
            chunk_index: i,
            text: s.text.to_string(),
            start_offset: s.start_offset,
            end_offset: s.end_offset,
            hash: content_hash(s.text),
            embedding: None,
        })
        .collect()
}

/// SHA-256 hex digest of a passage's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn span(text: &str, start: usize, end: usize) -> TextSpan<'_> {
    TextSpan {
        text: &text[start..end],
        start_offset: start,
        end_offset: end,
    }
}

/// Latest separator cut in `start..hard_end` that ends at or after `min_end`.
fn find_split(text: &str, start: usize, min_end: usize, hard_end: usize) -> Option<usize> {
    let window = &text[start..hard_end];
    SEPARATORS.iter().find_map(|sep| {
        window
            .rfind(sep)
            .map(|pos| start + pos + sep.len())
            .filter(|end| *end >= min_end)
    })
}

/// Byte index `n` characters after `from`, or the end of `text`.
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Byte index `n` characters before `from`.
fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}
