//! Language-model capability used by the three pipeline agents.
//!
//! The pipeline never talks to a provider directly. Retrieval, edit
//! proposal and verification each call one method of [`LanguageModel`],
//! so tests can script every step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::EditProposal;
use crate::tools::DocumentTools;

/// Everything the model needs to propose edits to one file.
#[derive(Debug, Clone, Copy)]
pub struct EditRequest<'a> {
    pub task: &'a str,
    pub file_path: &'a str,
    pub content: &'a str,
    /// The other files retrieved for this task, for cross-file context.
    /// Never includes `file_path` itself.
    pub available_paths: &'a [String],
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Turn a task description into search queries, typically a handful of
    /// code snippets likely to appear in the files that need changing.
    async fn formulate_queries(&self, task: &str) -> Result<Vec<String>>;

    /// Propose substitutions for one file. `tools` can be used to inspect
    /// any retrieved file and compute line ranges.
    async fn generate_edits(&self, request: &EditRequest<'_>, tools: &dyn DocumentTools) -> Result<Vec<EditProposal>>;

    /// Judge a set of proposals against the task and return the indices of
    /// the ones worth keeping.
    async fn verify_edits(&self, task: &str, proposals: &[EditProposal]) -> Result<Vec<usize>>;
}

/// [`LanguageModel`] that replays canned answers, for tests.
///
/// Edits are keyed by the file they are generated for. Without a scripted
/// verdict every proposal is kept.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    queries: Vec<String>,
    edits: HashMap<String, Vec<EditProposal>>,
    verdict: Option<Vec<usize>>,
    generate_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queries<I, Q>(mut self, queries: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queries = queries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_edits(mut self, file_path: &str, edits: Vec<EditProposal>) -> Self {
        self.edits.insert(file_path.to_string(), edits);
        self
    }

    pub fn with_verdict(mut self, keep: Vec<usize>) -> Self {
        self.verdict = Some(keep);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn formulate_queries(&self, _task: &str) -> Result<Vec<String>> {
        Ok(self.queries.clone())
    }

    async fn generate_edits(&self, request: &EditRequest<'_>, _tools: &dyn DocumentTools) -> Result<Vec<EditProposal>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.edits.get(request.file_path).cloned().unwrap_or_default())
    }

    async fn verify_edits(&self, _task: &str, proposals: &[EditProposal]) -> Result<Vec<usize>> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match &self.verdict {
            Some(keep) => keep.clone(),
            None => (0..proposals.len()).collect(),
        })
    }
}
