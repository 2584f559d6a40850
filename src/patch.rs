//! Patch application: accepted proposals → branch, commit, pull request.
//!
//! A run moves through these states, failing fatally at any of them:
//!
//! ```text
//! DOWNLOADED → GIT_INITIALIZED → EDITED → COMMITTED → PUSHED/PR_CREATED → CLEANED_UP
//! ```
//!
//! The working copy lives in a [`TempDir`] owned by the run, so it is
//! removed on success and on every error path.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::{debug, info};

use codemend_core::host::{PullRequestRef, PullRequestSpec, VersionControlHost};
use codemend_core::models::EditProposal;

use crate::config::PatchConfig;
use crate::error::PatchError;
use crate::git::GitRunner;

/// Length of the hex digest used in branch names.
const BRANCH_HASH_LEN: usize = 10;

/// Branch name for `task` at `revision`: `<prefix>/<digest>`, with `-2`,
/// `-3`, … appended until it is not in `existing`.
pub fn branch_name(prefix: &str, task: &str, revision: &str, existing: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task.as_bytes());
    hasher.update(b"\n");
    hasher.update(revision.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let base = format!("{}/{}", prefix.trim_end_matches('/'), &digest[..BRANCH_HASH_LEN]);

    let taken = |name: &str| existing.iter().any(|b| b == name);
    if !taken(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

/// Resolve a proposal path inside `root`, rejecting absolute paths and `..`.
pub fn checked_path(root: &Path, file_path: &str) -> Result<PathBuf, PatchError> {
    let invalid = || PatchError::InvalidPath {
        file_path: file_path.to_string(),
    };
    let relative = Path::new(file_path);
    if file_path.is_empty() || relative.is_absolute() {
        return Err(invalid());
    }
    let mut has_name = false;
    for component in relative.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }
    if !has_name {
        return Err(invalid());
    }
    Ok(root.join(relative))
}

/// Unpack a gzipped tarball into `dest/repo` and return that path.
///
/// Archives whose entries all sit under one top-level directory (as hosted
/// snapshots do) are flattened so the repository root is `dest/repo`.
pub fn extract_tarball(bytes: &[u8], dest: &Path) -> Result<PathBuf, PatchError> {
    let extract_err = |e: std::io::Error| PatchError::Extract(e.to_string());

    let staging = dest.join("extract");
    std::fs::create_dir_all(&staging).map_err(extract_err)?;
    tar::Archive::new(GzDecoder::new(bytes))
        .unpack(&staging)
        .map_err(extract_err)?;

    let top: Vec<PathBuf> = std::fs::read_dir(&staging)
        .map_err(extract_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(extract_err)?;

    let root = match top.as_slice() {
        [only] if only.is_dir() => only.clone(),
        _ => staging.clone(),
    };

    let repo = dest.join("repo");
    std::fs::rename(&root, &repo).map_err(extract_err)?;
    if root != staging {
        std::fs::remove_dir_all(&staging).map_err(extract_err)?;
    }
    Ok(repo)
}

/// Apply proposals to the working copy at `root`.
///
/// Proposals are applied in `(file_path, line_start)` order, ties keeping
/// input order. Each replaces every occurrence of its `original_text`; if
/// the text is gone by the time its turn comes (an earlier proposal
/// rewrote it) the run fails with [`PatchError::StalePrecondition`].
/// Returns the edited paths, sorted.
pub async fn apply_edits(root: &Path, proposals: &[EditProposal]) -> Result<Vec<String>> {
    let mut ordered: Vec<&EditProposal> = proposals.iter().collect();
    ordered.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.line_start.cmp(&b.line_start)));

    let mut touched = BTreeSet::new();
    for proposal in ordered {
        let path = checked_path(root, &proposal.file_path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", proposal.file_path))?;

        if proposal.original_text.is_empty() || !content.contains(&proposal.original_text) {
            return Err(PatchError::StalePrecondition {
                file_path: proposal.file_path.clone(),
                original_text: proposal.original_text.clone(),
            }
            .into());
        }

        let updated = content.replace(&proposal.original_text, &proposal.new_text);
        tokio::fs::write(&path, updated)
            .await
            .with_context(|| format!("Failed to write {}", proposal.file_path))?;
        debug!(file = %proposal.file_path, line = proposal.line_start, "applied edit");
        touched.insert(proposal.file_path.clone());
    }

    Ok(touched.into_iter().collect())
}

/// Turns accepted proposals into a pull request against one repository.
pub struct PatchApplicator<'a> {
    host: &'a dyn VersionControlHost,
    config: &'a PatchConfig,
}

impl<'a> PatchApplicator<'a> {
    pub fn new(host: &'a dyn VersionControlHost, config: &'a PatchConfig) -> Self {
        Self { host, config }
    }

    fn workspace(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codemend-");
        let dir = match &self.config.temp_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create temp directory {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        };
        dir.context("Failed to create working directory")
    }

    /// Apply `proposals` to `revision` on a fresh branch and open a pull request.
    pub async fn apply(&self, task: &str, revision: &str, proposals: &[EditProposal]) -> Result<PullRequestRef> {
        let tmp = self.workspace()?;
        info!(repo = self.host.identifier(), %revision, dir = %tmp.path().display(), "materializing working copy");

        let bytes = self
            .host
            .download_tarball(revision)
            .await
            .map_err(|e| PatchError::Download {
                revision: revision.to_string(),
                message: format!("{:#}", e),
            })?;
        let dest = tmp.path().to_path_buf();
        let repo_dir = tokio::task::spawn_blocking(move || extract_tarball(&bytes, &dest))
            .await
            .context("Archive extraction task failed")??;
        debug!(repo = %repo_dir.display(), "downloaded");

        let existing = self
            .host
            .list_branches()
            .await
            .map_err(|e| PatchError::Host(format!("{:#}", e)))?;
        let branch = branch_name(&self.config.branch_prefix, task, revision, &existing);

        let remote = self.host.remote_url();
        let mut git = GitRunner::new(&repo_dir, Duration::from_secs(self.config.git_timeout_secs));
        git.redact(remote.clone());

        git.run(&["init", "-q"]).await?;
        git.run(&["remote", "add", "origin", remote.as_str()]).await?;
        git.run(&["fetch", "-q", "origin"]).await?;
        git.run(&["reset", "-q", "--mixed", revision]).await?;
        git.run(&["checkout", "-q", "-b", branch.as_str()]).await?;
        debug!(%branch, "git initialized");

        let touched = apply_edits(&repo_dir, proposals).await?;
        debug!(files = touched.len(), "edited");

        let mut add = vec!["add", "--"];
        add.extend(touched.iter().map(String::as_str));
        git.run(&add).await?;
        if git.run(&["diff", "--cached", "--name-only"]).await?.is_empty() {
            return Err(PatchError::NothingToCommit.into());
        }

        let name = format!("user.name={}", self.config.author_name);
        let email = format!("user.email={}", self.config.author_email);
        git.run(&[
            "-c",
            name.as_str(),
            "-c",
            email.as_str(),
            "commit",
            "-q",
            "-m",
            self.config.commit_message.as_str(),
        ])
        .await?;
        debug!("committed");

        let refspec = format!("HEAD:refs/heads/{}", branch);
        git.run(&["push", "-q", "origin", refspec.as_str()]).await?;

        let base = self
            .host
            .default_branch()
            .await
            .map_err(|e| PatchError::Host(format!("{:#}", e)))?;
        let spec = PullRequestSpec {
            title: self.config.pr_title.clone(),
            body: self.config.pr_body.clone(),
            head: branch.clone(),
            base,
        };
        let pr = self
            .host
            .open_pull_request(&spec)
            .await
            .map_err(|e| PatchError::Host(format!("{:#}", e)))?;
        info!(number = pr.number, url = %pr.url, %branch, "pull request created");

        drop(tmp);
        Ok(pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn proposal(file_path: &str, line_start: i64, original_text: &str, new_text: &str) -> EditProposal {
        EditProposal {
            file_path: file_path.into(),
            line_start,
            line_end: line_start,
            original_text: original_text.into(),
            new_text: new_text.into(),
        }
    }

    fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_branch_name_is_deterministic() {
        let a = branch_name("codemend", "rename foo", "abc123", &[]);
        let b = branch_name("codemend/", "rename foo", "abc123", &[]);
        assert_eq!(a, b);
        assert!(a.starts_with("codemend/"));
        assert_eq!(a.len(), "codemend/".len() + BRANCH_HASH_LEN);
        assert_ne!(a, branch_name("codemend", "rename foo", "def456", &[]));
        assert_ne!(a, branch_name("codemend", "rename bar", "abc123", &[]));
    }

    #[test]
    fn test_branch_name_avoids_collisions() {
        let base = branch_name("codemend", "t", "r", &[]);
        let existing = vec!["main".to_string(), base.clone(), format!("{}-2", base)];
        assert_eq!(branch_name("codemend", "t", "r", &existing), format!("{}-3", base));
    }

    #[test]
    fn test_checked_path() {
        let root = Path::new("/work/repo");
        assert_eq!(checked_path(root, "pkg/a.py").unwrap(), root.join("pkg/a.py"));
        assert_eq!(checked_path(root, "./a.py").unwrap(), root.join("./a.py"));
        for bad in ["", "/etc/passwd", "../a.py", "pkg/../../a.py", "."] {
            assert!(
                matches!(checked_path(root, bad), Err(PatchError::InvalidPath { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_extract_flattens_wrapper_directory() {
        let tmp = TempDir::new().unwrap();
        let bytes = tarball(&[
            ("acme-widgets-abc123/a.py", "def foo():\n    pass\n"),
            ("acme-widgets-abc123/pkg/b.py", "x = 1\n"),
        ]);
        let repo = extract_tarball(&bytes, tmp.path()).unwrap();
        assert_eq!(repo, tmp.path().join("repo"));
        assert_eq!(std::fs::read_to_string(repo.join("a.py")).unwrap(), "def foo():\n    pass\n");
        assert_eq!(std::fs::read_to_string(repo.join("pkg/b.py")).unwrap(), "x = 1\n");
        assert!(!tmp.path().join("extract").exists());
    }

    #[test]
    fn test_extract_without_wrapper() {
        let tmp = TempDir::new().unwrap();
        let bytes = tarball(&[("a.py", "a\n"), ("b.py", "b\n")]);
        let repo = extract_tarball(&bytes, tmp.path()).unwrap();
        assert_eq!(std::fs::read_to_string(repo.join("b.py")).unwrap(), "b\n");
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(extract_tarball(b"not a tarball", tmp.path()), Err(PatchError::Extract(_))));
    }

    #[tokio::test]
    async fn test_apply_edits_replaces_every_occurrence() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.py"), "def foo():\n    pass\n\nfoo()\nfoo()\n").unwrap();

        let touched = apply_edits(tmp.path(), &[proposal("a.py", 4, "foo()", "bar()")]).await.unwrap();
        assert_eq!(touched, vec!["a.py"]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("a.py")).unwrap(),
            "def bar():\n    pass\n\nbar()\nbar()\n"
        );
    }

    #[tokio::test]
    async fn test_apply_edits_orders_by_file_then_line() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.py"), "x = 1\ny = 2\n").unwrap();
        std::fs::write(tmp.path().join("b.py"), "z = 3\n").unwrap();

        // Applied as a.py:1 then a.py:2; in input order the second would go stale.
        let proposals = vec![
            proposal("b.py", 1, "z = 3", "z = 4"),
            proposal("a.py", 2, "x = 10\ny = 2", "x = 10\ny = 20"),
            proposal("a.py", 1, "x = 1\n", "x = 10\n"),
        ];
        let touched = apply_edits(tmp.path(), &proposals).await.unwrap();
        assert_eq!(touched, vec!["a.py", "b.py"]);
        assert_eq!(std::fs::read_to_string(tmp.path().join("a.py")).unwrap(), "x = 10\ny = 20\n");
        assert_eq!(std::fs::read_to_string(tmp.path().join("b.py")).unwrap(), "z = 4\n");
    }

    #[tokio::test]
    async fn test_apply_edits_detects_stale_precondition() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.py"), "def foo():\n    return foo_helper()\n").unwrap();

        let proposals = vec![
            proposal("a.py", 1, "def foo():\n    return foo_helper()", "def bar():\n    return 1"),
            proposal("a.py", 2, "foo_helper()", "bar_helper()"),
        ];
        let err = apply_edits(tmp.path(), &proposals).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PatchError>(),
            Some(PatchError::StalePrecondition { original_text, .. }) if original_text == "foo_helper()"
        ));
    }

    #[tokio::test]
    async fn test_apply_edits_rejects_escaping_paths() {
        let tmp = TempDir::new().unwrap();
        let err = apply_edits(tmp.path(), &[proposal("../a.py", 1, "x", "y")]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::InvalidPath { .. })));
    }
}
