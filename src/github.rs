//! GitHub implementation of [`VersionControlHost`] over the REST API.
//!
//! Authentication uses a token read from the environment variable named in
//! `[github] token_env`. The same token authenticates git over HTTPS via
//! [`GitHubHost::remote_url`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use codemend_core::host::{EntryKind, PullRequestRef, PullRequestSpec, TreeEntry, VersionControlHost};

use crate::config::{secret_from_env, GithubConfig};

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// A single GitHub repository, addressed as `owner/name`.
pub struct GitHubHost {
    client: reqwest::Client,
    api_url: String,
    slug: String,
    token: String,
}

#[derive(Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Deserialize)]
struct CommitInfo {
    sha: String,
}

#[derive(Deserialize)]
struct ContentEntry {
    path: String,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct FileContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct BranchInfo {
    name: String,
}

#[derive(Deserialize)]
struct PullInfo {
    number: u64,
    html_url: String,
}

/// Check that `repo` looks like `owner/name`.
pub fn parse_slug(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') && owner != ".." && name != ".." =>
        {
            Ok((owner, name))
        }
        _ => bail!("Repository must be given as owner/name, got '{}'", repo),
    }
}

/// Web host for an API base URL: `https://api.github.com` → `github.com`,
/// `https://ghe.example.com/api/v3` → `ghe.example.com`.
fn web_host(api_url: &str) -> Result<String> {
    let url = Url::parse(api_url).with_context(|| format!("Invalid github.api_url: {}", api_url))?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("github.api_url has no host: {}", api_url))?;
    let host = host.strip_prefix("api.").unwrap_or(host);
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Decode a contents-API payload into text.
fn decode_content(path: &str, payload: FileContent) -> Result<Option<String>> {
    match (payload.encoding.as_deref(), payload.content) {
        (Some("base64"), Some(encoded)) => {
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact)
                .with_context(|| format!("Invalid base64 content for {}", path))?;
            let text = String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path))?;
            Ok(Some(text))
        }
        // Large files come back without inline content.
        _ => Ok(None),
    }
}

impl GitHubHost {
    pub fn new(api_url: &str, repo: &str, token: String, user_agent: &str) -> Result<Self> {
        parse_slug(repo)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token)).context("GitHub token contains invalid characters")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            slug: repo.to_string(),
            token,
        })
    }

    pub fn from_config(config: &GithubConfig, repo: &str) -> Result<Self> {
        let token = secret_from_env(&config.token_env)?;
        Self::new(&config.api_url, repo, token, &config.user_agent)
    }

    /// `{api_url}/repos/{owner}/{name}/{segments...}`, each segment escaped.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let (owner, name) = parse_slug(&self.slug)?;
        let mut url = Url::parse(&self.api_url).with_context(|| format!("Invalid github.api_url: {}", self.api_url))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| anyhow::anyhow!("github.api_url cannot be a base URL: {}", self.api_url))?;
            path.pop_if_empty().extend(["repos", owner, name]);
            path.extend(segments.iter().flat_map(|s| s.split('/')).filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = request.send().await.with_context(|| format!("GitHub request failed: {}", what))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, what, body.trim());
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let what = url.path().to_string();
        let resp = self.send(self.client.get(url), &what).await?;
        resp.json::<T>()
            .await
            .with_context(|| format!("Unexpected GitHub response for {}", what))
    }
}

#[async_trait]
impl VersionControlHost for GitHubHost {
    fn identifier(&self) -> &str {
        &self.slug
    }

    async fn default_branch(&self) -> Result<String> {
        let info: RepoInfo = self.get_json(self.endpoint(&[])?).await?;
        Ok(info.default_branch)
    }

    async fn head_revision(&self) -> Result<String> {
        let branch = self.default_branch().await?;
        let commit: CommitInfo = self.get_json(self.endpoint(&["commits", branch.as_str()])?).await?;
        debug!(repo = %self.slug, %branch, sha = %commit.sha, "resolved head revision");
        Ok(commit.sha)
    }

    async fn list_directory(&self, path: &str, revision: &str) -> Result<Vec<TreeEntry>> {
        let mut url = self.endpoint(&["contents", path])?;
        url.query_pairs_mut().append_pair("ref", revision);
        let entries: Vec<ContentEntry> = self.get_json(url).await?;
        Ok(entries
            .into_iter()
            .map(|e| TreeEntry {
                kind: match e.kind.as_str() {
                    "file" => EntryKind::File,
                    "dir" => EntryKind::Dir,
                    _ => EntryKind::Other,
                },
                path: e.path,
                name: e.name,
                size: e.size,
            })
            .collect())
    }

    async fn file_contents(&self, path: &str, revision: &str) -> Result<String> {
        let mut url = self.endpoint(&["contents", path])?;
        url.query_pairs_mut().append_pair("ref", revision);
        let payload: FileContent = self.get_json(url.clone()).await?;
        if let Some(text) = decode_content(path, payload)? {
            return Ok(text);
        }

        let resp = self
            .send(
                self.client.get(url).header(ACCEPT, "application/vnd.github.raw+json"),
                path,
            )
            .await?;
        resp.text().await.with_context(|| format!("Failed to read raw content of {}", path))
    }

    async fn download_tarball(&self, revision: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["tarball", revision])?;
        debug!(repo = %self.slug, %revision, "downloading tarball");
        let resp = self.send(self.client.get(url), "tarball").await?;
        let bytes = resp.bytes().await.context("Failed to read tarball body")?;
        Ok(bytes.to_vec())
    }

    fn remote_url(&self) -> String {
        let host = web_host(&self.api_url).unwrap_or_else(|_| "github.com".to_string());
        format!("https://x-access-token:{}@{}/{}.git", self.token, host, self.slug)
    }

    async fn list_branches(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for page in 1.. {
            let mut url = self.endpoint(&["branches"])?;
            url.query_pairs_mut()
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let batch: Vec<BranchInfo> = self.get_json(url).await?;
            let done = batch.len() < PAGE_SIZE;
            names.extend(batch.into_iter().map(|b| b.name));
            if done {
                break;
            }
        }
        Ok(names)
    }

    async fn open_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequestRef> {
        let url = self.endpoint(&["pulls"])?;
        let resp = self.send(self.client.post(url).json(spec), "create pull request").await?;
        let pull: PullInfo = resp.json().await.context("Unexpected pull request response")?;
        Ok(PullRequestRef {
            number: pull.number,
            url: pull.html_url,
            branch: spec.head.clone(),
        })
    }
}
