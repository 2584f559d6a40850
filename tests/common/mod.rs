//! Shared fixtures: a local "hosted" repository backed by a bare git repo.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

use codemend::config::Config;
use codemend_core::host::{EntryKind, PullRequestRef, PullRequestSpec, TreeEntry, VersionControlHost};

pub const REPO: &str = "acme/widgets";

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {:?}: {}", args, e));
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository with one commit on `main`, published to a local bare remote.
pub struct LocalHost {
    pub remote: PathBuf,
    pub revision: String,
    files: BTreeMap<String, String>,
    pub pull_requests: Mutex<Vec<PullRequestSpec>>,
}

impl LocalHost {
    pub fn new(root: &Path, files: &[(&str, &str)]) -> Self {
        let work = root.join("upstream");
        std::fs::create_dir_all(&work).unwrap();
        git(&work, &["init", "-q"]);
        git(&work, &["checkout", "-q", "-b", "main"]);
        for (path, content) in files {
            let full = work.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        git(&work, &["add", "-A"]);
        git(
            &work,
            &["-c", "user.name=Upstream", "-c", "user.email=upstream@example.test", "commit", "-q", "-m", "initial"],
        );
        let revision = git(&work, &["rev-parse", "HEAD"]);

        let remote = root.join("remote.git");
        git(root, &["clone", "-q", "--bare", work.to_str().unwrap(), remote.to_str().unwrap()]);

        Self {
            remote,
            revision,
            files: files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
            pull_requests: Mutex::new(Vec::new()),
        }
    }

    /// Content of `path` on `branch` in the remote.
    pub fn show(&self, branch: &str, path: &str) -> String {
        let object = format!("{}:{}", branch, path);
        git(&self.remote, &["show", object.as_str()])
    }

    pub fn branches(&self) -> Vec<String> {
        let out = git(&self.remote, &["for-each-ref", "--format=%(refname:short)", "refs/heads"]);
        out.lines().map(str::to_string).collect()
    }
}

#[async_trait]
impl VersionControlHost for LocalHost {
    fn identifier(&self) -> &str {
        REPO
    }

    async fn default_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }

    async fn head_revision(&self) -> Result<String> {
        Ok(self.revision.clone())
    }

    async fn list_directory(&self, path: &str, revision: &str) -> Result<Vec<TreeEntry>> {
        if revision != self.revision {
            bail!("unknown revision {}", revision);
        }
        let prefix = if path.is_empty() { String::new() } else { format!("{}/", path) };
        let mut entries: BTreeMap<String, TreeEntry> = BTreeMap::new();
        for (file, content) in &self.files {
            let Some(rest) = file.strip_prefix(&prefix) else { continue };
            let (name, kind, size) = match rest.split_once('/') {
                Some((dir, _)) => (dir.to_string(), EntryKind::Dir, 0),
                None => (rest.to_string(), EntryKind::File, content.len() as u64),
            };
            entries.insert(
                name.clone(),
                TreeEntry {
                    path: format!("{}{}", prefix, name),
                    name,
                    kind,
                    size,
                },
            );
        }
        Ok(entries.into_values().collect())
    }

    async fn file_contents(&self, path: &str, _revision: &str) -> Result<String> {
        match self.files.get(path) {
            Some(content) => Ok(content.clone()),
            None => bail!("no such file {}", path),
        }
    }

    async fn download_tarball(&self, revision: &str) -> Result<Vec<u8>> {
        let wrapper = format!("acme-widgets-{}", &revision[..7.min(revision.len())]);
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, format!("{}/{}", wrapper, path), content.as_bytes())?;
        }
        Ok(builder.into_inner()?.finish()?)
    }

    fn remote_url(&self) -> String {
        self.remote.to_string_lossy().to_string()
    }

    async fn list_branches(&self) -> Result<Vec<String>> {
        Ok(self.branches())
    }

    async fn open_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequestRef> {
        let mut prs = self.pull_requests.lock().unwrap();
        prs.push(spec.clone());
        let number = prs.len() as u64;
        Ok(PullRequestRef {
            number,
            url: format!("https://example.test/{}/pull/{}", REPO, number),
            branch: spec.head.clone(),
        })
    }
}

/// Config pointing every path into `root`.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::with_db_path(root.join("data").join("codemend.sqlite"));
    config.chunking.chunk_size = 40;
    config.chunking.overlap_size = 8;
    config.patch.temp_dir = Some(root.join("scratch"));
    config.patch.git_timeout_secs = 60;
    config
}

/// True when `dir` does not exist or is empty.
pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
}

pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}
