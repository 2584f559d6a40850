//! End-to-end pipeline: index → retrieve → propose → verify → patch.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use codemend_core::host::{PullRequestRef, VersionControlHost};
use codemend_core::llm::LanguageModel;
use codemend_core::models::{EditProposal, RelevantFile, RevisionMarker};
use codemend_core::store::{IndexStore, RevisionLedger};

use crate::agents::{EditProposalAgent, VerificationAgent};
use crate::config::Config;
use crate::error::PipelineError;
use crate::github::GitHubHost;
use crate::ingest::Indexer;
use crate::llm::OpenAiModel;
use crate::patch::PatchApplicator;
use crate::retrieve::RetrievalAgent;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pin a revision instead of the default branch head.
    pub revision: Option<String>,
    /// Stop after verification; nothing is pushed.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub revision: String,
    pub files: Vec<String>,
    pub proposed: usize,
    pub accepted: Vec<EditProposal>,
    /// `None` on a dry run or when no proposal survived verification.
    pub pull_request: Option<PullRequestRef>,
}

/// One repository's pipeline over explicit capabilities.
pub struct Pipeline<'a, S> {
    config: &'a Config,
    store: &'a S,
    model: &'a dyn LanguageModel,
    host: &'a dyn VersionControlHost,
}

impl<'a, S: IndexStore + RevisionLedger> Pipeline<'a, S> {
    pub fn new(config: &'a Config, store: &'a S, model: &'a dyn LanguageModel, host: &'a dyn VersionControlHost) -> Self {
        Self {
            config,
            store,
            model,
            host,
        }
    }

    /// Run every stage for `task`. The error names the stage that failed.
    pub async fn run(&self, task: &str, options: &RunOptions) -> Result<PipelineOutcome, PipelineError> {
        let revision = match &options.revision {
            Some(r) => r.clone(),
            None => self.host.head_revision().await.map_err(PipelineError::Indexing)?,
        };
        info!(repo = self.host.identifier(), %revision, "starting pipeline run");

        Indexer::from_config(self.store, self.config)
            .map_err(PipelineError::Indexing)?
            .ensure_indexed(self.host, &revision)
            .await
            .map_err(PipelineError::Indexing)?;

        let tree = RevisionMarker::new(self.host.identifier(), revision.as_str());
        let files: Vec<RelevantFile> = RetrievalAgent::from_config(self.store, self.model, self.config)
            .find_relevant_files(task, &tree)
            .await
            .map_err(PipelineError::Retrieval)?;

        let proposals = EditProposalAgent::new(self.model)
            .propose_edits(task, &files)
            .await
            .map_err(PipelineError::Proposal)?;
        let proposed = proposals.len();

        let accepted = VerificationAgent::new(self.model)
            .verify(task, proposals)
            .await
            .map_err(PipelineError::Verification)?;

        let pull_request = if options.dry_run || accepted.is_empty() {
            info!(accepted = accepted.len(), dry_run = options.dry_run, "no pull request opened");
            None
        } else {
            let pr = PatchApplicator::new(self.host, &self.config.patch)
                .apply(task, &revision, &accepted)
                .await
                .map_err(PipelineError::Patch)?;
            Some(pr)
        };

        Ok(PipelineOutcome {
            revision,
            files: files.into_iter().map(|f| f.path).collect(),
            proposed,
            accepted,
            pull_request,
        })
    }
}

/// `codemend run`: the full pipeline against a GitHub repository.
pub async fn run_task(config: &Config, repo: &str, task: &str, options: RunOptions) -> Result<()> {
    let host = GitHubHost::from_config(&config.github, repo)?;
    let model = OpenAiModel::from_config(&config.llm)?;
    let store = SqliteStore::open(config).await?;

    let result = Pipeline::new(config, &store, &model, &host).run(task, &options).await;
    store.close().await;
    let outcome = result?;

    println!("run {}", repo);
    println!("  revision: {}", outcome.revision);
    println!("  relevant files: {}", outcome.files.len());
    for file in &outcome.files {
        println!("    {}", file);
    }
    println!("  proposed edits: {}", outcome.proposed);
    println!("  accepted edits: {}", outcome.accepted.len());
    for edit in &outcome.accepted {
        println!("    {}:{}-{}", edit.file_path, edit.line_start, edit.line_end);
    }
    match &outcome.pull_request {
        Some(pr) => println!("  pull request: #{} {} ({})", pr.number, pr.url, pr.branch),
        None if options.dry_run => println!("  pull request: skipped (dry run)"),
        None => println!("  pull request: none (no accepted edits)"),
    }
    println!("ok");
    Ok(())
}
