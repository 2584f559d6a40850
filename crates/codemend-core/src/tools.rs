//! Document inspection tools offered to the language model while it drafts
//! edit proposals.
//!
//! The model sees only reconstructed file contents. [`DocumentTools`] lets it
//! read a whole file or locate the 1-based line range of a snippet, so the
//! `line_start`/`line_end` it reports are computed, not guessed.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::RelevantFile;

/// Inclusive, 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineRange {
    pub line_start: i64,
    pub line_end: i64,
}

/// Read-only access to the files under edit.
pub trait DocumentTools: Send + Sync {
    /// Full content of `path`, if known.
    fn inspect_document(&self, path: &str) -> Option<String>;

    /// Line range of the first occurrence of `snippet` in `path`.
    ///
    /// Returns `None` when the file is unknown, the snippet is empty, or the
    /// snippet does not occur.
    fn find_line_range(&self, path: &str, snippet: &str) -> Option<LineRange>;

    /// Paths of every known file, sorted.
    fn paths(&self) -> Vec<String>;
}

/// [`DocumentTools`] over a fixed set of files.
#[derive(Debug, Clone, Default)]
pub struct DocumentWorkspace {
    files: BTreeMap<String, String>,
}

impl DocumentWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn content(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl From<&[RelevantFile]> for DocumentWorkspace {
    fn from(files: &[RelevantFile]) -> Self {
        let mut ws = Self::new();
        for f in files {
            ws.insert(f.path.clone(), f.content.clone());
        }
        ws
    }
}

impl DocumentTools for DocumentWorkspace {
    fn inspect_document(&self, path: &str) -> Option<String> {
        self.files.get(path).cloned()
    }

    fn find_line_range(&self, path: &str, snippet: &str) -> Option<LineRange> {
        line_range(self.files.get(path)?, snippet)
    }

    fn paths(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

/// 1-based line range covered by the first occurrence of `snippet` in `content`.
pub fn line_range(content: &str, snippet: &str) -> Option<LineRange> {
    if snippet.is_empty() {
        return None;
    }
    let offset = content.find(snippet)?;
    let line_start = content[..offset].matches('\n').count() as i64 + 1;
    // A trailing newline ends the snippet's last line rather than opening a new one.
    let body = snippet.strip_suffix('\n').unwrap_or(snippet);
    let line_end = line_start + body.matches('\n').count() as i64;
    Some(LineRange { line_start, line_end })
}
