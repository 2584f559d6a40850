//! Retrieval: task text → relevant files with their full content.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use codemend_core::host::VersionControlHost;
use codemend_core::llm::LanguageModel;
use codemend_core::models::{RelevantFile, RevisionMarker};
use codemend_core::reconstruct::reconstruct_detailed;
use codemend_core::store::{IndexStore, MetadataField, RevisionLedger};

use crate::config::Config;
use crate::github::GitHubHost;
use crate::ingest::Indexer;
use crate::llm::OpenAiModel;
use crate::sqlite_store::SqliteStore;

/// Finds the files a task is about and rebuilds them from the index.
pub struct RetrievalAgent<'a, S> {
    store: &'a S,
    model: &'a dyn LanguageModel,
    overlap_size: usize,
    hits_per_query: usize,
}

impl<'a, S: IndexStore> RetrievalAgent<'a, S> {
    pub fn new(store: &'a S, model: &'a dyn LanguageModel, overlap_size: usize, hits_per_query: usize) -> Self {
        Self {
            store,
            model,
            overlap_size,
            hits_per_query,
        }
    }

    pub fn from_config(store: &'a S, model: &'a dyn LanguageModel, config: &Config) -> Self {
        Self::new(store, model, config.chunking.overlap_size, config.retrieval.hits_per_query)
    }

    /// Query the index for `task` within `tree` and return each hit file in full.
    ///
    /// Files are returned sorted by path. Every chunk of a hit file is
    /// fetched, not only the ranked ones. A file that cannot be rebuilt is
    /// dropped with a warning.
    pub async fn find_relevant_files(&self, task: &str, tree: &RevisionMarker) -> Result<Vec<RelevantFile>> {
        let queries = self
            .model
            .formulate_queries(task)
            .await
            .context("query formulation failed")?;
        if queries.is_empty() {
            warn!("no search queries formulated; nothing to retrieve");
            return Ok(Vec::new());
        }
        info!(queries = ?queries, "formulated search queries");

        let results = self.store.query(&queries, Some(tree), self.hits_per_query).await?;
        let paths: BTreeSet<String> = results
            .into_iter()
            .flatten()
            .map(|hit| hit.document.source)
            .collect();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let docs = self
                .store
                .get_by_metadata(MetadataField::Source, &path, Some(tree))
                .await?;
            let chunks: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();

            match reconstruct_detailed(&chunks, self.overlap_size) {
                Ok(rebuilt) => {
                    if !rebuilt.is_complete() {
                        warn!(
                            %path,
                            used = rebuilt.used,
                            duplicates = rebuilt.duplicates,
                            total = rebuilt.total,
                            "using partially reconstructed file"
                        );
                    }
                    files.push(RelevantFile {
                        path,
                        content: rebuilt.content,
                    });
                }
                Err(e) => warn!(%path, error = %e, "dropping file that could not be reconstructed"),
            }
        }

        info!(files = files.len(), "retrieved relevant files");
        Ok(files)
    }
}

/// `codemend reconstruct`: print one indexed file rebuilt from its chunks.
pub async fn run_reconstruct(config: &Config, repo: &str, path: &str, revision: &str) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let result = reconstruct_indexed(&store, repo, path, revision, config.chunking.overlap_size).await;
    store.close().await;

    print!("{}", result?);
    Ok(())
}

async fn reconstruct_indexed<S: IndexStore + RevisionLedger>(
    store: &S,
    repo: &str,
    path: &str,
    revision: &str,
    overlap_size: usize,
) -> Result<String> {
    let tree = RevisionMarker::new(repo, revision);
    if !store.is_indexed(&tree).await? {
        bail!("{} is not indexed at {}; run `codemend index {} --revision {}` first", repo, revision, repo, revision);
    }
    let docs = store
        .get_by_metadata(MetadataField::Source, path, Some(&tree))
        .await?;
    if docs.is_empty() {
        bail!("No chunks stored for {} at {}", path, revision);
    }
    let chunks: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
    Ok(reconstruct_detailed(&chunks, overlap_size)?.content)
}

/// `codemend retrieve`: index if needed, then list the files relevant to a task.
pub async fn run_retrieve(config: &Config, repo: &str, task: &str, revision: Option<String>) -> Result<()> {
    let host = GitHubHost::from_config(&config.github, repo)?;
    let model = OpenAiModel::from_config(&config.llm)?;
    let revision = match revision {
        Some(r) => r,
        None => host.head_revision().await?,
    };

    let store = SqliteStore::open(config).await?;
    let result = index_and_retrieve(&store, &host, &model, config, task, &revision).await;
    store.close().await;
    let files = result?;

    println!("retrieve {}", repo);
    println!("  revision: {}", revision);
    for file in &files {
        println!("  {} ({} lines)", file.path, file.content.lines().count());
    }
    println!("  files: {}", files.len());
    println!("ok");
    Ok(())
}

async fn index_and_retrieve(
    store: &SqliteStore,
    host: &GitHubHost,
    model: &OpenAiModel,
    config: &Config,
    task: &str,
    revision: &str,
) -> Result<Vec<RelevantFile>> {
    Indexer::from_config(store, config)?.ensure_indexed(host, revision).await?;
    let tree = RevisionMarker::new(host.identifier(), revision);
    RetrievalAgent::from_config(store, model, config)
        .find_relevant_files(task, &tree)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_core::chunk::{chunk_file, ChunkParams};
    use codemend_core::llm::ScriptedModel;
    use codemend_core::models::Document;
    use codemend_core::store::memory::InMemoryStore;

    const REPO: &str = "acme/widgets";

    const PARAMS: ChunkParams = ChunkParams {
        chunk_size: 24,
        overlap_size: 6,
    };

    const A_PY: &str = "import os\n\ndef foo():\n    return os.getcwd()\n\nprint(foo())\n";
    const B_PY: &str = "class Widget:\n    def size(self):\n        return 3\n";

    fn tree(revision: &str) -> RevisionMarker {
        RevisionMarker::new(REPO, revision)
    }

    async fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let mut docs = chunk_file(&tree("r1"), "pkg/a.py", A_PY, PARAMS);
        docs.reverse();
        docs.extend(chunk_file(&tree("r1"), "pkg/b.py", B_PY, PARAMS));
        docs.extend(chunk_file(&tree("r0"), "pkg/a.py", "def foo():\n    pass\n", PARAMS));
        store.put(&docs).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_finds_and_rebuilds_files() {
        let store = seeded_store().await;
        let model = ScriptedModel::new().with_queries(["def foo():", "print"]);
        let agent = RetrievalAgent::new(&store, &model, PARAMS.overlap_size, 1);

        let files = agent.find_relevant_files("rename foo to bar", &tree("r1")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "pkg/a.py");
        assert_eq!(files[0].content, A_PY);
    }

    #[tokio::test]
    async fn test_deduplicates_paths() {
        let store = seeded_store().await;
        let model = ScriptedModel::new().with_queries(["foo", "return", "Widget"]);
        let agent = RetrievalAgent::new(&store, &model, PARAMS.overlap_size, 10);

        let files = agent.find_relevant_files("task", &tree("r1")).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["pkg/a.py", "pkg/b.py"]);
        assert_eq!(files[1].content, B_PY);
    }

    #[tokio::test]
    async fn test_empty_queries_retrieve_nothing() {
        let store = seeded_store().await;
        let model = ScriptedModel::new();
        let agent = RetrievalAgent::new(&store, &model, PARAMS.overlap_size, 10);
        assert!(agent.find_relevant_files("task", &tree("r1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreconstructable_file_is_dropped() {
        let store = seeded_store().await;
        // Each chunk ends with the other's head, so neither can start the file.
        store
            .put(&[
                Document::new(&tree("r1"), "pkg/c.py", "foo_zz_one_yy_foo"),
                Document::new(&tree("r1"), "pkg/c.py", "yy_foo_two_foo_zz"),
            ])
            .await
            .unwrap();
        let model = ScriptedModel::new().with_queries(["foo"]);
        let agent = RetrievalAgent::new(&store, &model, PARAMS.overlap_size, 10);

        let files = agent.find_relevant_files("task", &tree("r1")).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["pkg/a.py"]);
    }

    #[tokio::test]
    async fn test_file_indexed_twice_is_still_retrieved() {
        let store = seeded_store().await;
        store.put(&chunk_file(&tree("r1"), "pkg/a.py", A_PY, PARAMS)).await.unwrap();
        let model = ScriptedModel::new().with_queries(["print"]);
        let agent = RetrievalAgent::new(&store, &model, PARAMS.overlap_size, 10);

        let files = agent.find_relevant_files("task", &tree("r1")).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "pkg/a.py");
        assert_eq!(files[0].content, A_PY);
    }

    #[tokio::test]
    async fn test_other_repository_at_same_revision_is_ignored() {
        let store = seeded_store().await;
        let fork = RevisionMarker::new("someone/widgets", "r1");
        store
            .put(&chunk_file(&fork, "pkg/z.py", "print('fork only')\n", PARAMS))
            .await
            .unwrap();
        let model = ScriptedModel::new().with_queries(["print"]);
        let agent = RetrievalAgent::new(&store, &model, PARAMS.overlap_size, 10);

        let files = agent.find_relevant_files("task", &tree("r1")).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["pkg/a.py"]);
    }

    #[tokio::test]
    async fn test_reconstruct_requires_index() {
        let store = seeded_store().await;
        let err = reconstruct_indexed(&store, "acme/widgets", "pkg/a.py", "r1", 6).await.unwrap_err();
        assert!(err.to_string().contains("not indexed"));

        store.mark_indexed(&RevisionMarker::new("acme/widgets", "r1")).await.unwrap();
        let content = reconstruct_indexed(&store, "acme/widgets", "pkg/a.py", "r1", 6).await.unwrap();
        assert_eq!(content, A_PY);
        store.mark_indexed(&RevisionMarker::new("someone/widgets", "r1")).await.unwrap();
        assert!(reconstruct_indexed(&store, "someone/widgets", "pkg/a.py", "r1", 6).await.is_err());
        assert!(reconstruct_indexed(&store, "acme/widgets", "pkg/zzz.py", "r1", 6).await.is_err());
    }
}
