//! Fixed-window text chunker with overlap.
//!
//! Splits extracted document text into [`Chunk`]s of at most `chunk_size`
//! characters. Chunk `i` starts at `i * (chunk_size - overlap)` and the walk
//! stops at the first chunk that reaches the end of the text, so consecutive
//! chunks share exactly `overlap` characters. Persisted indexes depend on this
//! layout; changing it invalidates every stored index.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Split text into overlapping windows. Returns no chunks for empty text.
///
/// Lengths and offsets are counted in `char`s, never bytes, so multi-byte
/// text is never split inside a code point. An `overlap >= chunk_size` is
/// clamped to a step of one character; config validation rejects it earlier.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = bounds.len() - 1;
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut index = 0;
    loop {
        let start = index * step;
        let end = (start + chunk_size).min(total_chars);
        chunks.push(Chunk {
            index,
            start,
            text: text[bounds[start]..bounds[end]].to_string(),
        });
        if end >= total_chars {
            break;
        }
        index += 1;
    }

    chunks
}

/// Expected chunk count for a text of `len` characters.
pub fn expected_chunk_count(len: usize, chunk_size: usize, overlap: usize) -> usize {
    if len == 0 {
        return 0;
    }
    if len <= chunk_size {
        return 1;
    }
    let step = chunk_size.saturating_sub(overlap).max(1);
    (len - overlap).div_ceil(step)
}

/// SHA-256 of a chunk's text, hex encoded.
pub fn chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
