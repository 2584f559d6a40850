//! Version-control host capability: repository browsing, archive download,
//! and pull-request creation.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, submodules and anything else that is not walked.
    Other,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Repository-relative path.
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

/// Parameters of a pull request to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestSpec {
    pub title: String,
    pub body: String,
    /// Branch containing the changes.
    pub head: String,
    /// Branch the changes should be merged into.
    pub base: String,
}

/// A pull request the host has accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    pub branch: String,
}

/// Access to one hosted repository.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`head_revision`](VersionControlHost::head_revision) | Latest commit on the default branch |
/// | [`list_directory`](VersionControlHost::list_directory) | Entries of one directory at a revision |
/// | [`file_contents`](VersionControlHost::file_contents) | Decoded text of one file at a revision |
/// | [`download_tarball`](VersionControlHost::download_tarball) | Gzipped tar archive of the tree at a revision |
/// | [`open_pull_request`](VersionControlHost::open_pull_request) | Open a PR from a pushed branch |
#[async_trait]
pub trait VersionControlHost: Send + Sync {
    /// Repository identifier, e.g. `owner/name`.
    fn identifier(&self) -> &str;

    async fn default_branch(&self) -> Result<String>;

    async fn head_revision(&self) -> Result<String>;

    /// Entries of `path` (`""` for the root) at `revision`.
    async fn list_directory(&self, path: &str, revision: &str) -> Result<Vec<TreeEntry>>;

    async fn file_contents(&self, path: &str, revision: &str) -> Result<String>;

    async fn download_tarball(&self, revision: &str) -> Result<Vec<u8>>;

    /// Authenticated URL git can fetch from and push to.
    ///
    /// May embed credentials; never log it verbatim.
    fn remote_url(&self) -> String;

    async fn list_branches(&self) -> Result<Vec<String>>;

    async fn open_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequestRef>;
}
