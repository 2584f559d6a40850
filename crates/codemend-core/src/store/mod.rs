//! Storage abstraction for the chunk index.
//!
//! [`IndexStore`] persists chunk [`Document`]s and answers ranked text
//! queries and exact metadata lookups. [`RevisionLedger`] records which
//! `(repository, revision)` pairs have been indexed. Both are capability
//! traits: the pipeline never names a concrete backend, so SQLite in
//! production and [`memory::InMemoryStore`] in tests are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, RevisionMarker, SearchHit};

/// Metadata fields a document can be looked up by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Repository,
    Source,
    Revision,
}

impl MetadataField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Repository => "repository",
            MetadataField::Source => "source",
            MetadataField::Revision => "revision",
        }
    }

    /// The value of this field on `doc`.
    pub fn value_of<'a>(&self, doc: &'a Document) -> &'a str {
        match self {
            MetadataField::Repository => &doc.repository,
            MetadataField::Source => &doc.source,
            MetadataField::Revision => &doc.revision,
        }
    }
}

/// Abstract chunk store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put`](IndexStore::put) | Store a batch of documents |
/// | [`get_by_revision`](IndexStore::get_by_revision) | All documents of one repository tree |
/// | [`query`](IndexStore::query) | Ranked text search, one result list per query text |
/// | [`get_by_metadata`](IndexStore::get_by_metadata) | Exact metadata match |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Store a batch of documents. Documents are never updated afterwards.
    async fn put(&self, documents: &[Document]) -> Result<()>;

    /// Every document stored for the tree `marker` names.
    ///
    /// Documents of another repository at the same revision are excluded.
    async fn get_by_revision(&self, marker: &RevisionMarker) -> Result<Vec<Document>>;

    /// Run each text as a query and return ranked hits per text, best first.
    ///
    /// When `scope` is set only documents of that repository tree match. At
    /// most `limit` hits are returned per text.
    async fn query(
        &self,
        texts: &[String],
        scope: Option<&RevisionMarker>,
        limit: usize,
    ) -> Result<Vec<Vec<SearchHit>>>;

    /// Documents whose `field` equals `value`, optionally restricted to one
    /// repository tree.
    async fn get_by_metadata(
        &self,
        field: MetadataField,
        value: &str,
        scope: Option<&RevisionMarker>,
    ) -> Result<Vec<Document>>;
}

/// Record of which repository revisions have been indexed.
#[async_trait]
pub trait RevisionLedger: Send + Sync {
    /// Whether `marker` has been recorded.
    async fn is_indexed(&self, marker: &RevisionMarker) -> Result<bool>;

    /// Record `marker` if absent.
    ///
    /// Returns `true` when this call inserted the record and `false` when it
    /// already existed, so concurrent indexers can tell who won.
    async fn mark_indexed(&self, marker: &RevisionMarker) -> Result<bool>;
}

/// Split a free-form query into lowercase identifier-like terms.
///
/// Punctuation is dropped, so `def foo(bar):` becomes `["def", "foo", "bar"]`.
/// Duplicate terms are removed, keeping first-seen order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_strip_punctuation() {
        assert_eq!(query_terms("def foo(bar):"), vec!["def", "foo", "bar"]);
        assert_eq!(query_terms("class Homework"), vec!["class", "homework"]);
        assert_eq!(query_terms("path/to/model.py"), vec!["path", "to", "model", "py"]);
    }

    #[test]
    fn test_query_terms_dedup_and_empty() {
        assert_eq!(query_terms("foo foo FOO"), vec!["foo"]);
        assert!(query_terms("():,").is_empty());
    }

    #[test]
    fn test_metadata_field_value() {
        let doc = Document::new(&RevisionMarker::new("acme/widgets", "rev1"), "a.py", "x");
        assert_eq!(MetadataField::Repository.value_of(&doc), "acme/widgets");
        assert_eq!(MetadataField::Source.value_of(&doc), "a.py");
        assert_eq!(MetadataField::Revision.value_of(&doc), "rev1");
        assert_eq!(MetadataField::Source.as_str(), "source");
    }
}
