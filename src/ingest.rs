//! Indexing orchestration.
//!
//! Walks a repository tree at one revision through the
//! [`VersionControlHost`], chunks every eligible file, and stores the chunks
//! once per `(repository, revision)`. A second call for an indexed revision
//! returns the stored chunks without touching the host tree.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, warn};

use codemend_core::chunk::{chunk_file, ChunkParams};
use codemend_core::host::{EntryKind, VersionControlHost};
use codemend_core::models::{Document, RevisionMarker};
use codemend_core::store::{IndexStore, RevisionLedger};

use crate::config::{Config, IndexingConfig};
use crate::github::GitHubHost;
use crate::sqlite_store::SqliteStore;

/// Include/exclude glob filter deciding which files are indexed.
pub struct FileFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include_globs)?,
            exclude: build_globset(exclude_globs)?,
        })
    }

    pub fn from_config(config: &IndexingConfig) -> Result<Self> {
        Self::new(&config.include_globs, &config.exclude_globs)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.include.is_match(path) && !self.exclude.is_match(path)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob pattern: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// What an [`Indexer::ensure_indexed`] call did.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub revision: String,
    pub documents: Vec<Document>,
    /// `true` when the revision was already indexed and nothing was walked.
    pub reused: bool,
    pub files_indexed: usize,
    pub files_empty: usize,
    pub files_failed: usize,
}

/// Chunks a repository revision into an index store.
pub struct Indexer<'a, S> {
    store: &'a S,
    filter: FileFilter,
    params: ChunkParams,
}

impl<'a, S: IndexStore + RevisionLedger> Indexer<'a, S> {
    pub fn new(store: &'a S, filter: FileFilter, params: ChunkParams) -> Self {
        Self { store, filter, params }
    }

    pub fn from_config(store: &'a S, config: &Config) -> Result<Self> {
        Ok(Self::new(store, FileFilter::from_config(&config.indexing)?, config.chunking.params()))
    }

    /// Make sure `revision` of `host`'s repository is indexed and return its chunks.
    ///
    /// Directory listing failures abort the walk. A file whose contents
    /// cannot be fetched is logged and skipped. Two concurrent calls for the
    /// same new revision may both index it; the ledger records it once and
    /// the loser logs the duplicate.
    pub async fn ensure_indexed(&self, host: &dyn VersionControlHost, revision: &str) -> Result<IndexSummary> {
        let marker = RevisionMarker::new(host.identifier(), revision);

        if self.store.is_indexed(&marker).await? {
            let documents = self.store.get_by_revision(&marker).await?;
            debug!(repo = %marker.source_identifier, %revision, chunks = documents.len(), "revision already indexed");
            return Ok(IndexSummary {
                revision: revision.to_string(),
                documents,
                reused: true,
                files_indexed: 0,
                files_empty: 0,
                files_failed: 0,
            });
        }

        info!(repo = %marker.source_identifier, %revision, "indexing revision");

        let mut documents = Vec::new();
        let mut files_indexed = 0;
        let mut files_empty = 0;
        let mut files_failed = 0;

        let mut pending = vec![String::new()];
        while let Some(dir) = pending.pop() {
            let entries = host
                .list_directory(&dir, revision)
                .await
                .with_context(|| format!("Failed to list directory '{}' at {}", dir, revision))?;

            for entry in entries {
                match entry.kind {
                    EntryKind::Dir => pending.push(entry.path),
                    EntryKind::Other => {}
                    EntryKind::File => {
                        if !self.filter.matches(&entry.path) {
                            continue;
                        }
                        if entry.size == 0 {
                            files_empty += 1;
                            continue;
                        }
                        let content = match host.file_contents(&entry.path, revision).await {
                            Ok(content) => content,
                            Err(e) => {
                                warn!(path = %entry.path, error = %format!("{:#}", e), "skipping file");
                                files_failed += 1;
                                continue;
                            }
                        };
                        if content.is_empty() {
                            files_empty += 1;
                            continue;
                        }
                        documents.extend(chunk_file(&marker, &entry.path, &content, self.params));
                        files_indexed += 1;
                    }
                }
            }
        }

        if !documents.is_empty() {
            self.store.put(&documents).await?;
        }
        if !self.store.mark_indexed(&marker).await? {
            warn!(repo = %marker.source_identifier, %revision, "revision was indexed concurrently; duplicate chunks stored");
        }

        info!(files = files_indexed, chunks = documents.len(), empty = files_empty, failed = files_failed, "indexed revision");

        Ok(IndexSummary {
            revision: revision.to_string(),
            documents,
            reused: false,
            files_indexed,
            files_empty,
            files_failed,
        })
    }
}

/// `codemend index`: index a repository at a revision (default branch head by default).
pub async fn run_index(config: &Config, repo: &str, revision: Option<String>) -> Result<()> {
    let host = GitHubHost::from_config(&config.github, repo)?;
    let revision = match revision {
        Some(r) => r,
        None => host.head_revision().await?,
    };

    let store = SqliteStore::open(config).await?;
    let summary = Indexer::from_config(&store, config)?.ensure_indexed(&host, &revision).await;
    store.close().await;
    let summary = summary?;

    println!("index {}", repo);
    println!("  revision: {}", summary.revision);
    if summary.reused {
        println!("  already indexed: {} chunks", summary.documents.len());
    } else {
        println!("  files indexed: {}", summary.files_indexed);
        println!("  empty files skipped: {}", summary.files_empty);
        println!("  files failed: {}", summary.files_failed);
        println!("  chunks written: {}", summary.documents.len());
    }
    println!("ok");
    Ok(())
}
