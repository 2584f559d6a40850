//! Typed errors for the pipeline stages and the patch applicator.

use thiserror::Error;

/// A failed pipeline run, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("indexing failed: {0:#}")]
    Indexing(#[source] anyhow::Error),
    #[error("retrieval failed: {0:#}")]
    Retrieval(#[source] anyhow::Error),
    #[error("edit proposal failed: {0:#}")]
    Proposal(#[source] anyhow::Error),
    #[error("verification failed: {0:#}")]
    Verification(#[source] anyhow::Error),
    #[error("patch application failed: {0:#}")]
    Patch(#[source] anyhow::Error),
}

impl PipelineError {
    /// Short name of the failed stage.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Indexing(_) => "indexing",
            PipelineError::Retrieval(_) => "retrieval",
            PipelineError::Proposal(_) => "proposal",
            PipelineError::Verification(_) => "verification",
            PipelineError::Patch(_) => "patch",
        }
    }
}

/// Version-control failures raised while materializing and publishing a patch.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to download archive for revision {revision}: {message}")]
    Download { revision: String, message: String },
    #[error("failed to extract archive: {0}")]
    Extract(String),
    #[error("`{command}` failed: {stderr}")]
    Git { command: String, stderr: String },
    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("original text no longer present in {file_path}: {original_text:?}")]
    StalePrecondition { file_path: String, original_text: String },
    #[error("refusing to edit path outside the working copy: {file_path}")]
    InvalidPath { file_path: String },
    #[error("proposals left the working copy unchanged")]
    NothingToCommit,
    #[error("repository host error: {0}")]
    Host(String),
}
