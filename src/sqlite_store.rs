//! SQLite-backed [`IndexStore`] and [`RevisionLedger`].
//!
//! Chunks live in `documents` with a mirror in the `documents_fts` FTS5
//! table; ranked queries use BM25 over identifier-like terms. Every lookup
//! is scoped by `(repository, revision)`, never by revision alone. Indexed
//! revisions live in `indexed_revisions`, keyed by
//! `(source_identifier, revision)`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use codemend_core::models::{Document, RevisionMarker, SearchHit};
use codemend_core::store::{query_terms, IndexStore, MetadataField, RevisionLedger};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of [`IndexStore`] and [`RevisionLedger`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Turn free text into an FTS5 expression: quoted terms joined by `OR`.
///
/// Returns `None` when the text has no searchable terms.
fn fts_expression(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Bind values for an optional `(repository, revision)` filter.
fn scope_binds(scope: Option<&RevisionMarker>) -> (Option<&str>, Option<&str>) {
    match scope {
        Some(marker) => (Some(marker.source_identifier.as_str()), Some(marker.revision.as_str())),
        None => (None, None),
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        content: row.get("content"),
        repository: row.get("repository"),
        source: row.get("source"),
        revision: row.get("revision"),
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn put(&self, documents: &[Document]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for doc in documents {
            sqlx::query(
                "INSERT INTO documents (id, repository, source, revision, content, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(&doc.repository)
            .bind(&doc.source)
            .bind(&doc.revision)
            .bind(&doc.content)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO documents_fts (document_id, content) VALUES (?, ?)")
                .bind(&doc.id)
                .bind(&doc.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_revision(&self, marker: &RevisionMarker) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, repository, source, revision, content FROM documents \
             WHERE repository = ? AND revision = ? ORDER BY rowid",
        )
        .bind(&marker.source_identifier)
        .bind(&marker.revision)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn query(
        &self,
        texts: &[String],
        scope: Option<&RevisionMarker>,
        limit: usize,
    ) -> Result<Vec<Vec<SearchHit>>> {
        let mut results = Vec::with_capacity(texts.len());
        let (repository, revision) = scope_binds(scope);

        for text in texts {
            let Some(expr) = fts_expression(text) else {
                results.push(Vec::new());
                continue;
            };

            let rows = sqlx::query(
                r#"
                SELECT d.id, d.repository, d.source, d.revision, d.content, documents_fts.rank AS fts_rank
                FROM documents_fts
                JOIN documents d ON d.id = documents_fts.document_id
                WHERE documents_fts MATCH ?
                  AND (? IS NULL OR (d.repository = ? AND d.revision = ?))
                ORDER BY documents_fts.rank
                LIMIT ?
                "#,
            )
            .bind(&expr)
            .bind(repository)
            .bind(repository)
            .bind(revision)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

            let hits = rows
                .iter()
                .map(|row| {
                    let rank: f64 = row.get("fts_rank");
                    SearchHit {
                        document: row_to_document(row),
                        score: -rank, // negate so higher = better
                    }
                })
                .collect();
            results.push(hits);
        }

        Ok(results)
    }

    async fn get_by_metadata(
        &self,
        field: MetadataField,
        value: &str,
        scope: Option<&RevisionMarker>,
    ) -> Result<Vec<Document>> {
        let (repository, revision) = scope_binds(scope);
        // Column names come from a closed enum, never from input.
        let sql = format!(
            "SELECT id, repository, source, revision, content FROM documents \
             WHERE {} = ? AND (? IS NULL OR (repository = ? AND revision = ?)) ORDER BY rowid",
            field.as_str()
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .bind(repository)
            .bind(repository)
            .bind(revision)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }
}

#[async_trait]
impl RevisionLedger for SqliteStore {
    async fn is_indexed(&self, marker: &RevisionMarker) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM indexed_revisions WHERE source_identifier = ? AND revision = ?",
        )
        .bind(&marker.source_identifier)
        .bind(&marker.revision)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn mark_indexed(&self, marker: &RevisionMarker) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO indexed_revisions (source_identifier, revision, indexed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source_identifier, revision) DO NOTHING
            "#,
        )
        .bind(&marker.source_identifier)
        .bind(&marker.revision)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPO: &str = "acme/widgets";

    fn tree(revision: &str) -> RevisionMarker {
        RevisionMarker::new(REPO, revision)
    }

    fn doc(content: &str, source: &str, revision: &str) -> Document {
        Document::new(&tree(revision), source, content)
    }

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let config = Config::with_db_path(tmp.path().join("data").join("index.sqlite"));
        SqliteStore::open(&config).await.unwrap()
    }

    #[test]
    fn test_fts_expression() {
        assert_eq!(fts_expression("def foo(bar):").as_deref(), Some("\"def\" OR \"foo\" OR \"bar\""));
        assert_eq!(fts_expression("  ()  "), None);
    }

    #[tokio::test]
    async fn test_put_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let docs = vec![
            doc("def foo():\n    return 1\n", "pkg/a.py", "r1"),
            doc("class Widget:\n    pass\n", "pkg/b.py", "r1"),
            doc("def foo():\n    return 2\n", "pkg/a.py", "r2"),
        ];
        store.put(&docs).await.unwrap();

        let r1 = store.get_by_revision(&tree("r1")).await.unwrap();
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[0], docs[0]);

        let a_r2 = store
            .get_by_metadata(MetadataField::Source, "pkg/a.py", Some(&tree("r2")))
            .await
            .unwrap();
        assert_eq!(a_r2, vec![docs[2].clone()]);

        let a_any = store.get_by_metadata(MetadataField::Source, "pkg/a.py", None).await.unwrap();
        assert_eq!(a_any.len(), 2);

        store.close().await;
    }

    #[tokio::test]
    async fn test_query_filters_by_revision() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .put(&[
                doc("def foo():\n    return 1\n", "a.py", "r1"),
                doc("def foo():\n    return 2\n", "a.py", "r2"),
                doc("class Widget:\n    pass\n", "b.py", "r1"),
            ])
            .await
            .unwrap();

        let results = store
            .query(
                &["def foo():".to_string(), "Widget".to_string(), "()".to_string()],
                Some(&tree("r1")),
                10,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].document.source, "a.py");
        assert_eq!(results[0][0].document.revision, "r1");
        assert_eq!(results[1][0].document.source, "b.py");
        assert!(results[2].is_empty());

        let all = store.query(&["foo".to_string()], None, 10).await.unwrap();
        assert_eq!(all[0].len(), 2);

        store.close().await;
    }

    #[tokio::test]
    async fn test_lookups_are_scoped_to_repository() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let fork = RevisionMarker::new("someone/widgets", "r1");

        let ours = doc("def foo():\n    return 1\n", "a.py", "r1");
        let theirs = Document::new(&fork, "a.py", "def foo():\n    return 99\n");
        store.put(&[ours.clone(), theirs.clone()]).await.unwrap();

        assert_eq!(store.get_by_revision(&tree("r1")).await.unwrap(), vec![ours.clone()]);
        assert_eq!(store.get_by_revision(&fork).await.unwrap(), vec![theirs.clone()]);

        let by_source = store
            .get_by_metadata(MetadataField::Source, "a.py", Some(&fork))
            .await
            .unwrap();
        assert_eq!(by_source, vec![theirs]);

        let hits = store.query(&["foo".to_string()], Some(&tree("r1")), 10).await.unwrap();
        assert_eq!(hits[0].len(), 1);
        assert_eq!(hits[0][0].document, ours);

        let by_repo = store
            .get_by_metadata(MetadataField::Repository, REPO, None)
            .await
            .unwrap();
        assert_eq!(by_repo.len(), 1);

        store.close().await;
    }

    #[tokio::test]
    async fn test_mark_indexed_conditional_insert() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let marker = RevisionMarker::new("acme/widgets", "abc123");

        assert!(!store.is_indexed(&marker).await.unwrap());
        assert!(store.mark_indexed(&marker).await.unwrap());
        assert!(!store.mark_indexed(&marker).await.unwrap());
        assert!(store.is_indexed(&marker).await.unwrap());
        assert!(!store.is_indexed(&RevisionMarker::new("acme/widgets", "def456")).await.unwrap());

        store.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        migrate::apply(store.pool()).await.unwrap();
        store.close().await;
    }
}
