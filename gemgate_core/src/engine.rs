use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::Config;
use crate::error::InvokeError;
use crate::models::ModelChoice;
use crate::redaction::redact_sensitive_text;
use crate::sanitize::SanitizedPrompt;

const MAX_ERROR_SNIPPET: usize = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationVia {
    Api,
    Cli,
}

impl InvocationVia {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationVia::Api => "api",
            InvocationVia::Cli => "cli",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    ExecutionFailed,
}

/// Terminal value handed back to the caller; never mutated after creation.
/// On failure, `output` carries the most recent underlying message, still
/// pre-redaction — the invoker scrubs it at the subsystem boundary.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    pub error_kind: Option<FailureKind>,
    pub via: InvocationVia,
}

impl ExecutionResult {
    fn success(output: String, via: InvocationVia) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output,
            error_kind: None,
            via,
        }
    }

    fn failure(kind: FailureKind, message: String, via: InvocationVia) -> Self {
        Self {
            status: ExecutionStatus::Error,
            output: message,
            error_kind: Some(kind),
            via,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Heartbeat emitted while a long-running invocation has produced no final
/// result yet. Ephemeral, not persisted.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub elapsed_seconds: u64,
}

pub type ProgressSender = mpsc::Sender<ProgressEvent>;

#[async_trait]
pub trait InvocationStrategy: Send + Sync {
    async fn invoke(
        &self,
        prompt: &SanitizedPrompt,
        model: &ModelChoice,
        timeout: Duration,
        progress: Option<&ProgressSender>,
    ) -> Result<String, InvokeError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChatMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

/// Direct call against the OpenAI-compatible Gemini endpoint. Preferred
/// strategy whenever a key is configured.
pub struct ApiStrategy {
    http_client: Client,
    base_url: String,
    api_key: String,
    max_response_bytes: usize,
}

impl ApiStrategy {
    pub fn new(base_url: String, api_key: String, max_response_bytes: usize) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            max_response_bytes,
        }
    }

    async fn request(
        &self,
        prompt: &SanitizedPrompt,
        model: &ModelChoice,
    ) -> Result<String, InvokeError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: model.model_name.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.as_str().to_string(),
            }],
            temperature: 0.2,
        };

        let response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| InvokeError::Execution(format!("API transport error: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| InvokeError::Execution(format!("API read error: {}", e)))?;

        if !status.is_success() {
            let lower = text.to_lowercase();
            let hint = if status.as_u16() == 429
                || lower.contains("rate limit")
                || lower.contains("quota")
            {
                " (quota/rate-limit)"
            } else if lower.contains("safety") || lower.contains("blocked") {
                " (content policy block)"
            } else {
                ""
            };
            return Err(InvokeError::Execution(format!(
                "API error (status {}): {}{}",
                status,
                truncate_snippet(&text),
                hint
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            InvokeError::Execution(format!(
                "failed to parse API response: {} | {}",
                e,
                truncate_snippet(&text)
            ))
        })?;

        let first = parsed
            .choices
            .first()
            .ok_or_else(|| InvokeError::Execution("no choices in API response".to_string()))?;

        match &first.message {
            Some(msg) if !msg.content.trim().is_empty() => {
                Ok(cap_response(msg.content.clone(), self.max_response_bytes))
            }
            _ => {
                let reason = first
                    .finish_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());
                Err(InvokeError::Execution(format!(
                    "API returned no content (finish reason: {})",
                    reason
                )))
            }
        }
    }
}

#[async_trait]
impl InvocationStrategy for ApiStrategy {
    async fn invoke(
        &self,
        prompt: &SanitizedPrompt,
        model: &ModelChoice,
        timeout: Duration,
        _progress: Option<&ProgressSender>,
    ) -> Result<String, InvokeError> {
        match tokio::time::timeout(timeout, self.request(prompt, model)).await {
            Ok(result) => result,
            Err(_) => Err(InvokeError::Timeout(timeout.as_secs())),
        }
    }
}

/// Fallback of record: spawns the local CLI with a discrete argument vector
/// (never a shell-interpreted string) and a scrubbed environment, streaming
/// output line by line under a watchdog.
pub struct CliStrategy {
    program: String,
    progress_interval: Duration,
    max_response_bytes: usize,
}

impl CliStrategy {
    pub fn new(program: String, progress_interval: Duration, max_response_bytes: usize) -> Self {
        Self {
            program,
            progress_interval,
            max_response_bytes,
        }
    }
}

#[async_trait]
impl InvocationStrategy for CliStrategy {
    async fn invoke(
        &self,
        prompt: &SanitizedPrompt,
        model: &ModelChoice,
        timeout: Duration,
        progress: Option<&ProgressSender>,
    ) -> Result<String, InvokeError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-m")
            .arg(&model.model_name)
            .arg("-p")
            .arg(prompt.as_str());

        // The child sees only what it needs: PATH, plus the cloud project
        // pass-through when present.
        cmd.env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        if let Some(project) = std::env::var_os("GOOGLE_CLOUD_PROJECT") {
            cmd.env("GOOGLE_CLOUD_PROJECT", project);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| InvokeError::Execution(format!("failed to spawn CLI: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokeError::Internal("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| InvokeError::Internal("failed to capture stderr".to_string()))?;

        let stderr_handle = tokio::spawn(async move {
            let mut captured = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                captured.push_str(&line);
                captured.push('\n');
            }
            captured
        });

        let start = Instant::now();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut heartbeat =
            tokio::time::interval_at(start + self.progress_interval, self.progress_interval);

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut collected = String::new();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        // Keep draining past the bound so the child never
                        // blocks on a full pipe, but stop buffering.
                        if collected.len() < self.max_response_bytes {
                            collected.push_str(&line);
                            collected.push('\n');
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("CLI output stream broken: {}", e);
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if let Some(tx) = progress {
                        let _ = tx
                            .send(ProgressEvent {
                                elapsed_seconds: start.elapsed().as_secs(),
                            })
                            .await;
                    }
                }
                _ = &mut deadline => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    stderr_handle.abort();
                    return Err(InvokeError::Timeout(timeout.as_secs()));
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status
                .map_err(|e| InvokeError::Execution(format!("failed to await CLI: {}", e)))?,
            _ = &mut deadline => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_handle.abort();
                return Err(InvokeError::Timeout(timeout.as_secs()));
            }
        };

        let stderr_text = stderr_handle.await.unwrap_or_default();

        if status.success() {
            Ok(cap_response(collected, self.max_response_bytes))
        } else {
            Err(InvokeError::Execution(format!(
                "CLI exited with {}: {}",
                status,
                truncate_snippet(stderr_text.trim())
            )))
        }
    }
}

/// API-first, CLI-fallback orchestration. Any recoverable API failure
/// transitions to the CLI path; `ExecutionFailed` is only produced after
/// both strategies have been tried.
pub struct ExecutionEngine {
    api: Option<ApiStrategy>,
    cli: CliStrategy,
}

impl ExecutionEngine {
    pub fn new(config: &Config) -> Self {
        let api = if config.has_api_key() {
            let key = config
                .api_key
                .clone()
                .unwrap_or_default()
                .trim()
                .to_string();
            Some(ApiStrategy::new(
                config.api_base_url.clone(),
                key,
                config.max_response_bytes,
            ))
        } else {
            None
        };

        Self {
            api,
            cli: CliStrategy::new(
                config.cli_program.clone(),
                Duration::from_secs(config.progress_interval_secs),
                config.max_response_bytes,
            ),
        }
    }

    pub async fn execute(
        &self,
        prompt: &SanitizedPrompt,
        model: &ModelChoice,
        timeout: Duration,
        progress: Option<&ProgressSender>,
    ) -> ExecutionResult {
        if let Some(api) = &self.api {
            tracing::debug!(model = %model.model_name, "attempting direct API call");
            match api.invoke(prompt, model, timeout, progress).await {
                Ok(output) => return ExecutionResult::success(output, InvocationVia::Api),
                Err(e) => {
                    tracing::warn!(
                        "API call failed, falling back to CLI: {}",
                        redact_sensitive_text(&e.to_string())
                    );
                }
            }
        } else {
            tracing::debug!("no API key configured, using CLI directly");
        }

        match self.cli.invoke(prompt, model, timeout, progress).await {
            Ok(output) => ExecutionResult::success(output, InvocationVia::Cli),
            Err(InvokeError::Timeout(secs)) => ExecutionResult::failure(
                FailureKind::Timeout,
                format!("execution timed out after {}s", secs),
                InvocationVia::Cli,
            ),
            Err(e) => {
                tracing::warn!(
                    "CLI fallback failed: {}",
                    redact_sensitive_text(&e.to_string())
                );
                ExecutionResult::failure(
                    FailureKind::ExecutionFailed,
                    e.to_string(),
                    InvocationVia::Cli,
                )
            }
        }
    }
}

/// Bounds upstream output: anything past `max_bytes` is cut at a char
/// boundary and the cut is logged. Truncation, not rejection, so a verbose
/// but otherwise good response still reaches the caller.
fn cap_response(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    tracing::warn!(
        received = text.len(),
        kept = end,
        "response exceeded configured bound, truncating"
    );
    text.truncate(end);
    text
}

fn truncate_snippet(text: &str) -> String {
    if text.len() > MAX_ERROR_SNIPPET {
        let mut end = MAX_ERROR_SNIPPET;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}
