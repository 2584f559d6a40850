//! Error types raised by the core algorithms.

use thiserror::Error;

/// Failure to rebuild a document from its chunks.
///
/// An incomplete stitch is not an error: [`reconstruct_detailed`](crate::reconstruct::reconstruct_detailed)
/// returns the partial text and reports how many chunks it consumed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconstructionError {
    /// Every chunk's leading overlap is the trailing overlap of some other
    /// chunk, so there is no way to tell where the document begins.
    #[error("unable to find a start chunk among {chunks} chunks (overlap {overlap_size})")]
    NoStartChunk { chunks: usize, overlap_size: usize },
}
