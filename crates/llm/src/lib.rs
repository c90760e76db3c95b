//! Completion-provider seam and the OpenAI-compatible HTTP client.
//!
//! Everything above this crate talks to the model through
//! [`CompletionClient`]; the concrete [`OpenAiCompatClient`] streams tokens
//! over an `mpsc` channel while accumulating the full reply.

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

// ── messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

// ── request / client trait ────────────────────────────────────────────────────

/// One completion call. `history` precedes `prompt`; `stop` sequences are
/// forwarded to the provider so the model halts where the caller expects.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), ..Self::default() }
    }
}

/// Seam between the orchestration engine and the model provider.
///
/// `token_tx`, when supplied, receives each streamed token in arrival order;
/// the full accumulated text is returned either way. Implementations must be
/// safe for concurrent use from independent invocations.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
        token_tx: Option<mpsc::Sender<String>>,
    ) -> Result<String>;
}

// ── OpenAI-compatible client ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_payload(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        for msg in &request.history {
            messages.push(serde_json::to_value(msg).unwrap_or_default());
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
            "stream": stream,
        });
        if !request.stop.is_empty() {
            payload["stop"] = json!(request.stop);
        }
        payload
    }

    fn request_builder(&self, payload: &serde_json::Value) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.endpoint()).json(payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn complete_batch(&self, request: &CompletionRequest) -> Result<String> {
        let payload = self.build_payload(request, false);
        let response = self.request_builder(&payload).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(provider_error(status, &text));
        }
        let body: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| anyhow!("provider response is not JSON ({err}): {text}"))?;

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("provider response missing message content: {body}"))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
        token_tx: mpsc::Sender<String>,
    ) -> Result<String> {
        let payload = self.build_payload(request, true);
        let mut response = self.request_builder(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(status, &body));
        }

        let mut full = String::new();
        let mut carry = String::new();
        while let Some(chunk) = response.chunk().await? {
            // SSE events may split across chunk boundaries; keep the last
            // partial line around until its remainder arrives.
            carry.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = carry.find('\n') {
                let line = carry[..newline].to_string();
                carry.drain(..=newline);
                if let Some(token) = delta_from_sse_line(&line) {
                    full.push_str(&token);
                    let _ = token_tx.send(token).await;
                }
            }
        }
        if let Some(token) = delta_from_sse_line(&carry) {
            full.push_str(&token);
            let _ = token_tx.send(token).await;
        }

        debug!(len = full.len(), "streamed completion finished");
        Ok(full)
    }
}

/// Build the error for a non-success provider status. The raw body is kept
/// verbatim; gateways often answer with HTML rather than JSON.
fn provider_error(status: reqwest::StatusCode, body: &str) -> anyhow::Error {
    anyhow!("provider returned {status}: {body}")
}

/// Extract the content delta from one SSE line of a streaming chat response.
/// Returns `None` for keep-alives, `[DONE]`, and non-data lines.
fn delta_from_sse_line(line: &str) -> Option<String> {
    let line = line.trim();
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    json.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(|content| content.as_str())
        .filter(|content| !content.is_empty())
        .map(ToString::to_string)
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(
        &self,
        request: CompletionRequest,
        token_tx: Option<mpsc::Sender<String>>,
    ) -> Result<String> {
        match token_tx {
            Some(tx) => self.complete_stream(&request, tx).await,
            None => self.complete_batch(&request).await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
