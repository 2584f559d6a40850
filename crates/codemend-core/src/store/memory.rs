//! In-memory [`IndexStore`] and [`RevisionLedger`] for tests.
//!
//! Uses `Vec` and `HashSet` behind `std::sync::RwLock`. Queries score each
//! document by how many distinct query terms its content contains, which
//! is enough to exercise retrieval without a real similarity engine.

use std::collections::HashSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, RevisionMarker, SearchHit};

use super::{query_terms, IndexStore, MetadataField, RevisionLedger};

/// In-memory store for tests and embedding into other tools.
pub struct InMemoryStore {
    documents: RwLock<Vec<Document>>,
    indexed: RwLock<HashSet<RevisionMarker>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            indexed: RwLock::new(HashSet::new()),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_scope(doc: &Document, scope: Option<&RevisionMarker>) -> bool {
    scope.map_or(true, |marker| marker.contains(doc))
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn put(&self, documents: &[Document]) -> Result<()> {
        let mut stored = self.documents.write().unwrap();
        stored.extend(documents.iter().cloned());
        Ok(())
    }

    async fn get_by_revision(&self, marker: &RevisionMarker) -> Result<Vec<Document>> {
        let stored = self.documents.read().unwrap();
        Ok(stored.iter().filter(|d| marker.contains(d)).cloned().collect())
    }

    async fn query(
        &self,
        texts: &[String],
        scope: Option<&RevisionMarker>,
        limit: usize,
    ) -> Result<Vec<Vec<SearchHit>>> {
        let stored = self.documents.read().unwrap();
        let results = texts
            .iter()
            .map(|text| {
                let terms = query_terms(text);
                if terms.is_empty() {
                    return Vec::new();
                }
                let mut hits: Vec<SearchHit> = stored
                    .iter()
                    .filter(|d| in_scope(d, scope))
                    .filter_map(|d| {
                        let content = d.content.to_lowercase();
                        let matches = terms.iter().filter(|t| content.contains(t.as_str())).count();
                        (matches > 0).then(|| SearchHit {
                            document: d.clone(),
                            score: matches as f64,
                        })
                    })
                    .collect();
                hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                hits.truncate(limit);
                hits
            })
            .collect();
        Ok(results)
    }

    async fn get_by_metadata(
        &self,
        field: MetadataField,
        value: &str,
        scope: Option<&RevisionMarker>,
    ) -> Result<Vec<Document>> {
        let stored = self.documents.read().unwrap();
        Ok(stored
            .iter()
            .filter(|d| field.value_of(d) == value && in_scope(d, scope))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RevisionLedger for InMemoryStore {
    async fn is_indexed(&self, marker: &RevisionMarker) -> Result<bool> {
        Ok(self.indexed.read().unwrap().contains(marker))
    }

    async fn mark_indexed(&self, marker: &RevisionMarker) -> Result<bool> {
        Ok(self.indexed.write().unwrap().insert(marker.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "acme/widgets";

    fn doc(content: &str, source: &str, revision: &str) -> Document {
        Document::new(&RevisionMarker::new(REPO, revision), source, content)
    }

    fn tree(revision: &str) -> RevisionMarker {
        RevisionMarker::new(REPO, revision)
    }

    #[tokio::test]
    async fn test_query_ranks_and_filters_revision() {
        let store = InMemoryStore::new();
        store
            .put(&[
                doc("def foo():\n    return bar", "a.py", "r1"),
                doc("def foo(): pass", "b.py", "r1"),
                doc("def foo():\n    return bar", "a.py", "r0"),
                doc("unrelated", "c.py", "r1"),
            ])
            .await
            .unwrap();

        let results = store
            .query(&["foo bar".to_string(), "zzz".to_string()], Some(&tree("r1")), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        let hits = &results[0];
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.source, "a.py");
        assert!(hits.iter().all(|h| h.document.revision == "r1"));
        assert!(results[1].is_empty());
    }

    #[tokio::test]
    async fn test_query_respects_limit() {
        let store = InMemoryStore::new();
        let docs: Vec<Document> = (0..5).map(|i| doc("foo", &format!("{i}.py"), "r1")).collect();
        store.put(&docs).await.unwrap();
        let results = store.query(&["foo".to_string()], None, 3).await.unwrap();
        assert_eq!(results[0].len(), 3);
    }

    #[tokio::test]
    async fn test_get_by_metadata_and_revision() {
        let store = InMemoryStore::new();
        store
            .put(&[doc("one", "a.py", "r1"), doc("two", "a.py", "r2"), doc("three", "b.py", "r1")])
            .await
            .unwrap();

        let a_r1 = store
            .get_by_metadata(MetadataField::Source, "a.py", Some(&tree("r1")))
            .await
            .unwrap();
        assert_eq!(a_r1.len(), 1);
        assert_eq!(a_r1[0].content, "one");

        let all_a = store.get_by_metadata(MetadataField::Source, "a.py", None).await.unwrap();
        assert_eq!(all_a.len(), 2);

        assert_eq!(store.get_by_revision(&tree("r1")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_revision_in_another_repository_is_invisible() {
        let store = InMemoryStore::new();
        let fork = RevisionMarker::new("someone/widgets-fork", "r1");
        store
            .put(&[doc("def foo(): pass", "a.py", "r1"), Document::new(&fork, "a.py", "def foo(): fork")])
            .await
            .unwrap();

        let ours = store.get_by_revision(&tree("r1")).await.unwrap();
        assert_eq!(ours.len(), 1);
        assert_eq!(ours[0].content, "def foo(): pass");

        let hits = store.query(&["foo".to_string()], Some(&fork), 10).await.unwrap();
        assert_eq!(hits[0].len(), 1);
        assert_eq!(hits[0][0].document.repository, "someone/widgets-fork");

        let by_source = store
            .get_by_metadata(MetadataField::Source, "a.py", Some(&tree("r1")))
            .await
            .unwrap();
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_source[0].repository, REPO);
    }

    #[tokio::test]
    async fn test_mark_indexed_is_conditional() {
        let store = InMemoryStore::new();
        let marker = RevisionMarker::new("owner/repo", "abc");
        assert!(!store.is_indexed(&marker).await.unwrap());
        assert!(store.mark_indexed(&marker).await.unwrap());
        assert!(!store.mark_indexed(&marker).await.unwrap());
        assert!(store.is_indexed(&marker).await.unwrap());
    }
}
