//! Edit proposal and verification agents.
//!
//! [`EditProposalAgent`] asks the model for substitutions one file at a time
//! and drops any that are not grounded in the retrieved content.
//! [`VerificationAgent`] lets the model veto proposals; its output is always
//! an order-preserving subsequence of its input.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{info, warn};

use codemend_core::llm::{EditRequest, LanguageModel};
use codemend_core::models::{EditProposal, RelevantFile};
use codemend_core::tools::{DocumentTools, DocumentWorkspace};

/// Why a proposal was rejected before verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ungrounded {
    UnknownFile,
    EmptyOriginal,
    OriginalNotFound,
}

impl std::fmt::Display for Ungrounded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Ungrounded::UnknownFile => "file was not retrieved",
            Ungrounded::EmptyOriginal => "original text is empty",
            Ungrounded::OriginalNotFound => "original text does not occur in the file",
        })
    }
}

/// Check a proposal against the files it may touch, filling in its line
/// range when the model left it out or got it backwards.
pub fn ground(workspace: &DocumentWorkspace, mut proposal: EditProposal) -> Result<EditProposal, Ungrounded> {
    let content = workspace
        .content(&proposal.file_path)
        .ok_or(Ungrounded::UnknownFile)?;
    if proposal.original_text.is_empty() {
        return Err(Ungrounded::EmptyOriginal);
    }
    if !content.contains(&proposal.original_text) {
        return Err(Ungrounded::OriginalNotFound);
    }
    if proposal.line_start < 1 || proposal.line_end < proposal.line_start {
        if let Some(range) = workspace.find_line_range(&proposal.file_path, &proposal.original_text) {
            proposal.line_start = range.line_start;
            proposal.line_end = range.line_end;
        }
    }
    Ok(proposal)
}

pub struct EditProposalAgent<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> EditProposalAgent<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    /// Propose edits for every file, concatenated in file order.
    ///
    /// Each request lists the other retrieved paths, never the file itself.
    pub async fn propose_edits(&self, task: &str, files: &[RelevantFile]) -> Result<Vec<EditProposal>> {
        let workspace = DocumentWorkspace::from(files);
        let paths = workspace.paths();
        let mut proposals = Vec::new();

        for file in files {
            let others: Vec<String> = paths.iter().filter(|p| **p != file.path).cloned().collect();
            let request = EditRequest {
                task,
                file_path: &file.path,
                content: &file.content,
                available_paths: &others,
            };
            let edits = self
                .model
                .generate_edits(&request, &workspace)
                .await
                .with_context(|| format!("edit generation failed for {}", file.path))?;

            let generated = edits.len();
            for edit in edits {
                match ground(&workspace, edit) {
                    Ok(edit) => proposals.push(edit),
                    Err(reason) => warn!(file = %file.path, %reason, "dropping ungrounded proposal"),
                }
            }
            info!(file = %file.path, generated, "proposed edits");
        }

        Ok(proposals)
    }
}

pub struct VerificationAgent<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> VerificationAgent<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }

    /// Keep the proposals the model accepts, in input order.
    ///
    /// Indices the model returns more than once or past the end of the list
    /// are ignored. An empty input is returned without asking the model.
    pub async fn verify(&self, task: &str, proposals: Vec<EditProposal>) -> Result<Vec<EditProposal>> {
        if proposals.is_empty() {
            return Ok(proposals);
        }

        let keep: BTreeSet<usize> = self
            .model
            .verify_edits(task, &proposals)
            .await
            .context("verification failed")?
            .into_iter()
            .filter(|&i| i < proposals.len())
            .collect();

        let total = proposals.len();
        let kept: Vec<EditProposal> = proposals
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, p)| p)
            .collect();
        info!(kept = kept.len(), rejected = total - kept.len(), "verified proposals");
        Ok(kept)
    }
}
