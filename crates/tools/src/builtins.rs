//! Built-in tools registered for agent-mode sessions.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use tracing::debug;

use quill_llm::{CompletionClient, CompletionRequest};

use crate::{DocumentSink, OperatorChannel, Tool, calc};

// ── calculator ───────────────────────────────────────────────────────────────

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Input is the expression (e.g. 2 + 2 * 10), output is the numeric result."
    }

    async fn run(&self, input: &str) -> Result<String> {
        let value = calc::evaluate(input)
            .with_context(|| format!("could not evaluate expression {input:?}"))?;
        Ok(calc::format_value(value))
    }
}

// ── human-input ──────────────────────────────────────────────────────────────

const HUMAN_INPUT_FALLBACK: &str = "The user didn't respond in time, use your best judgement";

/// Asks the operator a short question and waits up to `timeout` for an
/// answer. A missing or late answer yields a fixed fallback string rather
/// than an error, so the loop always gets an observation.
pub struct HumanInputTool {
    channel: Arc<dyn OperatorChannel>,
    timeout: Duration,
}

impl HumanInputTool {
    pub fn new(channel: Arc<dyn OperatorChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }
}

#[async_trait]
impl Tool for HumanInputTool {
    fn name(&self) -> &str {
        "human-input"
    }

    fn description(&self) -> &str {
        "Ask the user for a specific piece of information only they would know. Input is a short question, output is their answer."
    }

    async fn run(&self, input: &str) -> Result<String> {
        let answer = tokio::time::timeout(self.timeout, self.channel.ask(input))
            .await
            .ok()
            .flatten();
        Ok(answer.unwrap_or_else(|| HUMAN_INPUT_FALLBACK.to_string()))
    }
}

// ── web-search ───────────────────────────────────────────────────────────────

/// Queries the DuckDuckGo Instant Answer API (no key required) and returns
/// the abstract text plus the top related topics.
pub struct WebSearchTool {
    pub max_results: usize,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self { max_results: 5 }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web-search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Input is the query to search for, output is summarized results."
    }

    async fn run(&self, input: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let response = client
            .get("https://api.duckduckgo.com/")
            .query(&[
                ("q", input),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await?;
        let json: serde_json::Value = response.json().await?;

        let abstract_text = json["AbstractText"].as_str().unwrap_or("").trim().to_string();
        let abstract_source = json["AbstractSource"].as_str().unwrap_or("").trim();

        let mut parts: Vec<String> = Vec::new();
        if !abstract_text.is_empty() {
            if abstract_source.is_empty() {
                parts.push(abstract_text);
            } else {
                parts.push(format!("{abstract_text} (source: {abstract_source})"));
            }
        }

        if let Some(topics) = json["RelatedTopics"].as_array() {
            for topic in topics.iter().take(self.max_results) {
                let text = topic["Text"].as_str().unwrap_or("").trim();
                if !text.is_empty() {
                    parts.push(format!("• {text}"));
                }
            }
        }

        if parts.is_empty() {
            Ok(format!("No results found for: {input}"))
        } else {
            Ok(parts.join("\n"))
        }
    }
}

// ── website-browser ──────────────────────────────────────────────────────────

/// Fetches a page through the configured CORS proxy and returns a text
/// summary plus extracted links.
pub struct WebsiteBrowserTool {
    proxy_url: String,
    max_summary_chars: usize,
    max_links: usize,
}

impl WebsiteBrowserTool {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            max_summary_chars: 2000,
            max_links: 10,
        }
    }
}

#[async_trait]
impl Tool for WebsiteBrowserTool {
    fn name(&self) -> &str {
        "website-browser"
    }

    fn description(&self) -> &str {
        "Read a website. Input is the full url (e.g. https://www.example.com/), output is a summary and relevant links."
    }

    async fn run(&self, input: &str) -> Result<String> {
        let target = url::Url::parse(input.trim())
            .map_err(|err| anyhow!("input must be an absolute url: {err}"))?;

        let encoded = utf8_percent_encode(target.as_str(), NON_ALPHANUMERIC);
        let proxied = format!("{}/proxy?url={encoded}", self.proxy_url.trim_end_matches('/'));
        debug!(url = %target, "fetching page through proxy");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        let response = client.get(&proxied).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetch of {target} failed with status {status}");
        }
        let body = response.text().await?;

        Ok(summarize_page(&body, &target, self.max_summary_chars, self.max_links))
    }
}

/// Strip a fetched page down to readable text and a handful of absolute
/// links. Synchronous on purpose: `scraper::Html` is not `Send`, so it must
/// not live across an await point.
fn summarize_page(body: &str, base: &url::Url, max_chars: usize, max_links: usize) -> String {
    let document = scraper::Html::parse_document(body);

    let text = document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let summary: String = text.chars().take(max_chars).collect();

    let anchor = scraper::Selector::parse("a[href]").expect("static selector");
    let mut links: Vec<String> = Vec::new();
    for element in document.select(&anchor) {
        if links.len() >= max_links {
            break;
        }
        let Some(href) = element.attr("href") else { continue };
        let Ok(resolved) = base.join(href) else { continue };
        let label = element.text().collect::<String>();
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if label.is_empty() {
            links.push(format!("- {resolved}"));
        } else {
            links.push(format!("- {label}: {resolved}"));
        }
    }

    if links.is_empty() {
        summary
    } else {
        format!("{summary}\n\nLinks:\n{}", links.join("\n"))
    }
}

// ── create-document-or-report ────────────────────────────────────────────────

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("static regex"));
static CONTENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<content>(.*?)</content>").expect("static regex"));

const DOCUMENT_CREATED_ACK: &str = "I've created the document for you.";

/// Direct-return tool: pushes a document into the workspace and finishes the
/// loop with a fixed acknowledgement instead of another reasoning step.
pub struct CreateDocumentTool {
    sink: Arc<dyn DocumentSink>,
}

impl CreateDocumentTool {
    pub fn new(sink: Arc<dyn DocumentSink>) -> Self {
        Self { sink }
    }
}

/// Extract `<title>` and `<content>` tag bodies independently; either tag
/// may be absent and defaults to the empty string.
pub fn extract_document_fields(input: &str) -> (String, String) {
    let title = TITLE_RE
        .captures(input)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default();
    let content = CONTENT_RE
        .captures(input)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default();
    (title, content)
}

#[async_trait]
impl Tool for CreateDocumentTool {
    fn name(&self) -> &str {
        "create-document-or-report"
    }

    fn description(&self) -> &str {
        "Create a document or report for the user. Input is <title>Title</title> <content>Content</content>. The user receives the document automatically; do not repeat it in your response."
    }

    fn returns_direct(&self) -> bool {
        true
    }

    async fn run(&self, input: &str) -> Result<String> {
        let (title, content) = extract_document_fields(input);
        self.sink.create_document(&title, &content).await?;
        Ok(DOCUMENT_CREATED_ACK.to_string())
    }
}

// ── create-color-tokens ──────────────────────────────────────────────────────

/// Direct-return tool: generates named color tokens for a palette
/// description, writes them into a new document, and reports success.
pub struct ColorTokensTool {
    client: Arc<dyn CompletionClient>,
    sink: Arc<dyn DocumentSink>,
}

impl ColorTokensTool {
    pub fn new(client: Arc<dyn CompletionClient>, sink: Arc<dyn DocumentSink>) -> Self {
        Self { client, sink }
    }
}

/// Keep only lines shaped like `name: value`; the model tends to wrap its
/// answer in prose or fences.
pub fn parse_token_lines(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*', ' ']);
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            let value = value.trim();
            if name.is_empty() || !value.starts_with('#') {
                return None;
            }
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl Tool for ColorTokensTool {
    fn name(&self) -> &str {
        "create-color-tokens"
    }

    fn description(&self) -> &str {
        "Create named color tokens from a palette description (e.g. 'a palette of colors inspired by the beach'). The user receives the tokens as a document automatically; do not repeat them in your response."
    }

    fn returns_direct(&self) -> bool {
        true
    }

    async fn run(&self, input: &str) -> Result<String> {
        let request = CompletionRequest::from_prompt(format!(
            "Generate a set of design color tokens for the following description:\n\
             {input}\n\n\
             Reply with one token per line in the exact form `name: #hex` and nothing else."
        ));
        let raw = self.client.complete(request, None).await?;

        let tokens = parse_token_lines(&raw);
        if tokens.is_empty() {
            bail!("model returned no parseable color tokens");
        }

        let listing = tokens
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        let content = format!("```\n{listing}\n```");
        self.sink.create_document("Color Tokens", &content).await?;

        Ok("success".to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
