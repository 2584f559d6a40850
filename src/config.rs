//! TOML configuration for the `codemend` binary.
//!
//! Every section except `[db]` is optional and falls back to defaults, so a
//! minimal config is just a database path. Secrets (model API key, GitHub
//! token) are never stored in the file; the config names the environment
//! variables they are read from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use codemend_core::chunk::{ChunkParams, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP_SIZE};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub patch: PatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap_size: DEFAULT_OVERLAP_SIZE,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            overlap_size: self.overlap_size,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap_size() -> usize {
    DEFAULT_OVERLAP_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.py".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hits_per_query")]
    pub hits_per_query: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hits_per_query: default_hits_per_query(),
        }
    }
}

fn default_hits_per_query() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on tool-call round trips per edit-generation request.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_tool_rounds() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token_env: default_token_env(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_user_agent() -> String {
    format!("codemend/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchConfig {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    #[serde(default = "default_pr_title")]
    pub pr_title: String,
    #[serde(default = "default_pr_body")]
    pub pr_body: String,
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// Parent directory for working copies. Defaults to the system temp dir.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            commit_message: default_commit_message(),
            pr_title: default_pr_title(),
            pr_body: default_pr_body(),
            git_timeout_secs: default_git_timeout_secs(),
            author_name: default_author_name(),
            author_email: default_author_email(),
            temp_dir: None,
        }
    }
}

fn default_branch_prefix() -> String {
    "codemend".to_string()
}
fn default_commit_message() -> String {
    "Commit changes".to_string()
}
fn default_pr_title() -> String {
    "Automated changes".to_string()
}
fn default_pr_body() -> String {
    "This pull request was opened by codemend.".to_string()
}
fn default_git_timeout_secs() -> u64 {
    120
}
fn default_author_name() -> String {
    "codemend".to_string()
}
fn default_author_email() -> String {
    "codemend@users.noreply.github.com".to_string()
}

impl Config {
    /// Config with defaults everywhere and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: db_path.into() },
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            github: GithubConfig::default(),
            patch: PatchConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.overlap_size == 0 {
        anyhow::bail!("chunking.overlap_size must be > 0");
    }
    if config.chunking.chunk_size <= config.chunking.overlap_size {
        anyhow::bail!(
            "chunking.chunk_size ({}) must be greater than chunking.overlap_size ({})",
            config.chunking.chunk_size,
            config.chunking.overlap_size
        );
    }

    // Validate indexing
    if config.indexing.include_globs.is_empty() {
        anyhow::bail!("indexing.include_globs must not be empty");
    }

    // Validate retrieval
    if config.retrieval.hits_per_query < 1 {
        anyhow::bail!("retrieval.hits_per_query must be >= 1");
    }

    // Validate llm
    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }
    if config.llm.max_tool_rounds == 0 {
        anyhow::bail!("llm.max_tool_rounds must be >= 1");
    }

    // Validate patch
    if config.patch.git_timeout_secs == 0 {
        anyhow::bail!("patch.git_timeout_secs must be > 0");
    }
    if config.patch.branch_prefix.trim().is_empty() {
        anyhow::bail!("patch.branch_prefix must not be empty");
    }

    Ok(())
}

/// Read a secret from the environment variable named by the config.
pub fn secret_from_env(var: &str) -> Result<String> {
    let value = std::env::var(var).with_context(|| format!("environment variable {} is not set", var))?;
    if value.trim().is_empty() {
        anyhow::bail!("environment variable {} is empty", var);
    }
    Ok(value)
}
