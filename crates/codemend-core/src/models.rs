//! Core data models shared by the indexing and edit pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored chunk of a source file at a given revision.
///
/// Documents are immutable once stored. The `id` is a fresh UUID and is
/// unrelated to the content, so two chunks with identical text are still
/// distinct documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    /// Repository identifier, e.g. `owner/name`.
    pub repository: String,
    /// Repository-relative path of the file the chunk was cut from.
    pub source: String,
    /// Revision (commit SHA) the file was read at.
    pub revision: String,
}

impl Document {
    /// A new chunk of `source` in the tree identified by `marker`.
    pub fn new(marker: &RevisionMarker, source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            repository: marker.source_identifier.clone(),
            source: source.into(),
            revision: marker.revision.clone(),
        }
    }

    /// The tree this chunk belongs to.
    pub fn marker(&self) -> RevisionMarker {
        RevisionMarker::new(self.repository.clone(), self.revision.clone())
    }
}

/// Identifies "this repository's tree as of revision X".
///
/// Also the scope of every index lookup, so two repositories that share a
/// commit (a fork and its upstream) never see each other's chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionMarker {
    /// Repository identifier, e.g. `owner/name`.
    pub source_identifier: String,
    pub revision: String,
}

impl RevisionMarker {
    pub fn new(source_identifier: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            revision: revision.into(),
        }
    }

    /// Whether `doc` belongs to this tree.
    pub fn contains(&self, doc: &Document) -> bool {
        doc.repository == self.source_identifier && doc.revision == self.revision
    }
}

/// A ranked hit returned by [`IndexStore::query`](crate::store::IndexStore::query).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    /// Backend-specific relevance score; higher is better.
    pub score: f64,
}

/// A file located by retrieval, with its content reconstructed from chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelevantFile {
    pub path: String,
    pub content: String,
}

/// A candidate text substitution in a single file.
///
/// `original_text` must be a literal substring of the file content the
/// proposal was made against. Applying the proposal replaces every
/// occurrence of `original_text` with `new_text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditProposal {
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
    pub original_text: String,
    pub new_text: String,
}
