//! OpenAI-compatible chat-completions client implementing [`LanguageModel`].
//!
//! All three agent calls ask for a JSON object reply. A reply that is not
//! JSON, or lacks the expected list, is an error for the run; only a
//! well-formed empty list means "nothing". Malformed items inside a valid
//! list are dropped with a warning. Transport errors, 429 and 5xx
//! responses are retried with exponential backoff; other HTTP errors fail
//! immediately.
//!
//! Edit generation runs a bounded tool loop: the model may call
//! `inspect_document` and `find_line_range` before answering. The last
//! round is sent without tools so the loop always ends with an answer.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use codemend_core::llm::{EditRequest, LanguageModel};
use codemend_core::models::EditProposal;
use codemend_core::tools::DocumentTools;

use crate::config::{secret_from_env, LlmConfig};

const QUERY_PROMPT: &str = "You are a senior software engineer. Given a change request for a \
codebase, write search queries that locate the files needing changes. Prefer literal code \
fragments likely to appear in those files: function or class signatures, identifiers, \
import lines, file paths. Return 3 to 8 queries.\n\
Example task: Add a new field to the homework model\n\
Example reply: {\"queries\": [\"def homework_router()\", \"class Homework\", \"homework_model.py\", \"Homework(\"]}\n\
Reply with a JSON object of the form {\"queries\": [string]}.";

const EDIT_PROMPT: &str = "You are a principal software engineer. Propose the code changes to \
one file that the task requires. The file may need no changes at all. Change only what the \
task needs: do not reformat, rename, or tidy unrelated code. Make every change that is needed, \
since your changes are applied to the codebase as given.\n\
Each change replaces original_text with new_text. original_text must be copied verbatim from \
the file. Use find_line_range to compute line_start and line_end; use inspect_document to read \
other files when the change depends on them.\n\
Reply with a JSON object of the form {\"code_changes\": [{\"file_path\": string, \
\"line_start\": integer, \"line_end\": integer, \"original_text\": string, \"new_text\": string}]}. \
Use an empty list when nothing needs to change.";

const VERIFY_PROMPT: &str = "You are a senior software engineer reviewing proposed code changes. \
Keep a change only if all of these hold:\n\
- it is necessary to complete the task\n\
- it is not just refactoring or reformatting\n\
- it is in line with the task and introduces no new bugs\n\
- it does not alter functionality the task does not ask to change\n\
Each change has an index. Reply with a JSON object of the form {\"keep\": [integer]} listing \
the indices of the changes to keep.";

/// Chat-completions client for OpenAI and compatible servers.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    max_tool_rounds: usize,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
            max_tool_rounds: config.max_tool_rounds.max(1),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = secret_from_env(&config.api_key_env)?;
        Self::new(config, api_key)
    }

    /// POST one chat-completions request and return the first choice's message.
    async fn chat(&self, body: &Value) -> Result<Value> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await.context("Invalid chat completion response")?;
                        return first_message(&json);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        debug!(%status, attempt, "retrying chat completion");
                        last_err = Some(anyhow::anyhow!("Model API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Model API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }

    fn request(&self, messages: &[Value]) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "response_format": {"type": "json_object"},
        })
    }
}

fn first_message(json: &Value) -> Result<Value> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Chat completion response has no choices"))
}

fn message_text(message: &Value) -> &str {
    message.get("content").and_then(Value::as_str).unwrap_or("")
}

/// Function-calling definitions of the two document tools.
fn tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": "inspect_document",
                "description": "Return the full content of a retrieved file.",
                "parameters": {
                    "type": "object",
                    "properties": {"path": {"type": "string"}},
                    "required": ["path"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": "find_line_range",
                "description": "Return the 1-based first and last line of the first occurrence of text in a file.",
                "parameters": {
                    "type": "object",
                    "properties": {"path": {"type": "string"}, "text": {"type": "string"}},
                    "required": ["path", "text"]
                }
            }
        }
    ])
}

/// Run one tool call and render its result as the tool message content.
fn execute_tool(tools: &dyn DocumentTools, name: &str, arguments: &str) -> String {
    let args: Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => return format!("error: invalid arguments: {}", e),
    };
    let arg = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");

    match name {
        "inspect_document" => tools
            .inspect_document(arg("path"))
            .unwrap_or_else(|| format!("error: no such file: {}", arg("path"))),
        "find_line_range" => match tools.find_line_range(arg("path"), arg("text")) {
            Some(range) => json!(range).to_string(),
            None => "error: text not found".to_string(),
        },
        other => format!("error: unknown tool: {}", other),
    }
}

/// Model replies sometimes wrap JSON in markdown fences.
fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    let Some(rest) = t.strip_prefix("```") else { return t };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract `key` from a JSON object reply, or accept a bare array.
fn reply_list(text: &str, key: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(strip_fences(text))
        .with_context(|| format!("Model reply is not JSON (expected a \"{}\" list)", key))?;
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => bail!("Model reply field \"{}\" is not a list", key),
            None => bail!("Model reply has no \"{}\" list", key),
        },
        _ => bail!("Model reply is neither an object nor a list"),
    }
}

pub(crate) fn parse_queries(text: &str) -> Result<Vec<String>> {
    let items = reply_list(text, "queries")?;
    Ok(items
        .into_iter()
        .filter_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .collect())
}

pub(crate) fn parse_edits(text: &str) -> Result<Vec<EditProposal>> {
    #[derive(Deserialize)]
    struct RawEdit {
        file_path: String,
        #[serde(default)]
        line_start: i64,
        #[serde(default)]
        line_end: i64,
        original_text: String,
        new_text: String,
    }

    let items = reply_list(text, "code_changes")?;
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawEdit>(item) {
            Ok(e) => Some(EditProposal {
                file_path: e.file_path,
                line_start: e.line_start,
                line_end: e.line_end,
                original_text: e.original_text,
                new_text: e.new_text,
            }),
            Err(e) => {
                warn!(error = %e, "dropping malformed code change");
                None
            }
        })
        .collect())
}

pub(crate) fn parse_indices(text: &str) -> Result<Vec<usize>> {
    let items = reply_list(text, "keep")?;
    Ok(items
        .into_iter()
        .filter_map(|v| match v.as_u64() {
            Some(n) => Some(n as usize),
            None => {
                warn!(value = %v, "dropping malformed verification index");
                None
            }
        })
        .collect())
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn formulate_queries(&self, task: &str) -> Result<Vec<String>> {
        let messages = [
            json!({"role": "system", "content": QUERY_PROMPT}),
            json!({"role": "user", "content": format!("Task: {}", task)}),
        ];
        let message = self.chat(&self.request(&messages)).await?;
        parse_queries(message_text(&message)).context("unusable query formulation reply")
    }

    async fn generate_edits(&self, request: &EditRequest<'_>, tools: &dyn DocumentTools) -> Result<Vec<EditProposal>> {
        let mut messages = vec![
            json!({"role": "system", "content": EDIT_PROMPT}),
            json!({
                "role": "user",
                "content": format!(
                    "Task: {}\n\nOther retrieved files: {}\n\nFile path: {}\n\nFile content:\n{}",
                    request.task,
                    request.available_paths.join(", "),
                    request.file_path,
                    request.content
                ),
            }),
        ];

        for round in 0..self.max_tool_rounds {
            let mut body = self.request(&messages);
            if round + 1 < self.max_tool_rounds {
                body["tools"] = tool_definitions();
            }

            let message = self.chat(&body).await?;
            let calls = message
                .get("tool_calls")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            if calls.is_empty() {
                return parse_edits(message_text(&message))
                    .with_context(|| format!("unusable code change reply for {}", request.file_path));
            }

            messages.push(message);
            for call in &calls {
                let id = call.get("id").and_then(Value::as_str).unwrap_or("");
                let function = call.get("function");
                let name = function.and_then(|f| f.get("name")).and_then(Value::as_str).unwrap_or("");
                let arguments = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or("{}");
                debug!(file = request.file_path, tool = name, "model tool call");
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": execute_tool(tools, name, arguments),
                }));
            }
        }

        bail!(
            "model kept calling tools for {} after {} rounds and returned no code changes",
            request.file_path,
            self.max_tool_rounds
        )
    }

    async fn verify_edits(&self, task: &str, proposals: &[EditProposal]) -> Result<Vec<usize>> {
        let listing: Vec<Value> = proposals
            .iter()
            .enumerate()
            .map(|(index, p)| {
                json!({
                    "index": index,
                    "file_path": p.file_path,
                    "line_start": p.line_start,
                    "line_end": p.line_end,
                    "original_text": p.original_text,
                    "new_text": p.new_text,
                })
            })
            .collect();
        let messages = [
            json!({"role": "system", "content": VERIFY_PROMPT}),
            json!({
                "role": "user",
                "content": format!("Task: {}\n\nProposed changes:\n{}", task, serde_json::to_string_pretty(&listing)?),
            }),
        ];
        let message = self.chat(&self.request(&messages)).await?;
        parse_indices(message_text(&message)).context("unusable verification reply")
    }
}
