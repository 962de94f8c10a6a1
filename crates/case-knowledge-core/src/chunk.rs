//! Token-bounded, order-preserving document chunker.
//!
//! Splits extracted document text into segments that respect a
//! configurable `max_tokens` limit. Splitting happens on paragraph
//! boundaries (`\n\n`) so each chunk stays semantically coherent; a
//! paragraph that alone exceeds the limit is hard-split at the nearest
//! newline or space.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Accumulate trimmed paragraphs into a buffer until adding the next
//!    one would exceed `max_chars`, then flush the buffer as a segment.
//! 3. Oversized paragraphs flush the buffer and are hard-split.
//! 4. Segment indices are contiguous: `0, 1, …, n-1`.
//!
//! Blank input yields no segments; the caller decides whether that is an
//! error.
//!
//! # Example
//!
//! ```rust
//! use case_knowledge_core::chunk::chunk_text;
//!
//! let segments = chunk_text("Guard rail missing.\n\nLevel 3 east side.", 300);
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].index, 0);
//! ```

use crate::models::{file_chunk_id, ChunkMetadata, PendingChunk};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// One ordered piece of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub index: u32,
    pub text: String,
}

/// Split text into ordered segments on paragraph boundaries.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<TextSegment> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextSegment {
            index: i as u32,
            text,
        })
        .collect()
}

/// Build pending chunks for one uploaded document.
///
/// Every chunk carries the filename, its position and the total count so
/// the document can be reassembled from the index alone.
pub fn document_chunks(
    case_id: &str,
    doc_id: &str,
    source_filename: &str,
    mime_type: &str,
    text: &str,
    max_tokens: usize,
) -> Vec<PendingChunk> {
    let segments = chunk_text(text, max_tokens);
    let total = segments.len() as u32;
    segments
        .into_iter()
        .map(|seg| PendingChunk {
            chunk_id: file_chunk_id(case_id, doc_id, seg.index),
            text: seg.text,
            metadata: ChunkMetadata::Document {
                doc_id: doc_id.to_string(),
                source_filename: source_filename.to_string(),
                mime_type: mime_type.to_string(),
                chunk_index: seg.index,
                total_chunks: total,
            },
        })
        .collect()
}

/// Split an oversized paragraph, preferring newline then space boundaries.
fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let limit = at_least_one_char(remaining, limit);

        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let split_at = at_least_one_char(remaining, snap_to_char_boundary(remaining, split_at));

        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        remaining = &remaining[split_at..];
    }
}

/// Guarantees forward progress when `index` is 0.
fn at_least_one_char(s: &str, index: usize) -> usize {
    if index == 0 {
        s.char_indices()
            .nth(1)
            .map(|(i, _)| i)
            .unwrap_or(s.len())
    } else {
        index
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Rebuild display text from chunks of one document, in chunk_index order.
pub fn reassemble<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    let mut parts: Vec<(u32, &str)> = chunks.into_iter().collect();
    parts.sort_by_key(|(index, _)| *index);
    parts
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n\n")
}
