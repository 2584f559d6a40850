//! Fixed-size, overlapping text chunker.
//!
//! Splits file content into windows of `chunk_size` characters, advancing
//! by `chunk_size - overlap_size` each step, so consecutive chunks share
//! exactly `overlap_size` characters. The [`reconstruct`](crate::reconstruct)
//! module relies on that shared overlap to put chunks back in order.
//!
//! Lengths are counted in Unicode scalar values, so a multi-byte
//! character is never cut in half.
//!
//! # Example
//!
//! ```rust
//! use codemend_core::chunk::{split, ChunkParams};
//!
//! let params = ChunkParams { chunk_size: 5, overlap_size: 2 };
//! assert_eq!(split("ABCDEFGHI", params), vec!["ABCDE", "DEFGH", "GHI"]);
//! ```

use crate::models::{Document, RevisionMarker};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_OVERLAP_SIZE: usize = 100;

/// Window parameters for [`split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub overlap_size: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap_size: DEFAULT_OVERLAP_SIZE,
        }
    }
}

/// Split `content` into ordered, overlapping chunks.
///
/// - Empty content yields no chunks.
/// - Content shorter than `chunk_size` yields itself as the only chunk.
/// - Otherwise a window of `chunk_size` starts at 0 and advances by
///   `chunk_size - overlap_size` until its start reaches the end of the
///   content; the final chunk may be shorter than `chunk_size`.
///
/// The output is deterministic for a given input and parameters.
pub fn split(content: &str, params: ChunkParams) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the string.
    let bounds: Vec<usize> = content
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(content.len()))
        .collect();
    let len = bounds.len() - 1;

    let chunk_size = params.chunk_size.max(1);
    if len < chunk_size {
        return vec![content.to_string()];
    }

    let step = chunk_size.saturating_sub(params.overlap_size).max(1);
    let mut chunks = Vec::with_capacity(len / step + 1);
    let mut start = 0;
    while start < len {
        let end = (start + chunk_size).min(len);
        chunks.push(content[bounds[start]..bounds[end]].to_string());
        start += step;
    }
    chunks
}

/// Chunk one file into [`Document`]s tagged with its path and tree.
///
/// Each document gets a fresh id. A zero-length file produces no documents.
pub fn chunk_file(marker: &RevisionMarker, source: &str, content: &str, params: ChunkParams) -> Vec<Document> {
    split(content, params)
        .into_iter()
        .map(|chunk| Document::new(marker, source, chunk))
        .collect()
}
