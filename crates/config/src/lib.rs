use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ── provider ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    /// Overridden at runtime by the `QUILL_PROVIDER_BASE_URL` environment
    /// variable when set.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> String {
        env::var("QUILL_PROVIDER_BASE_URL").unwrap_or_else(|_| self.base_url.clone())
    }

    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

// ── agent ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub user_name: String,
    pub user_location: String,
    /// Hard cap on agent-loop iterations before the run is abandoned.
    pub max_iterations: usize,
    /// Bounded wait for the human-input tool, in seconds.
    pub human_input_timeout_secs: u64,
    /// Default mode for workspaces that have not chosen one.
    pub default_mode: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Quill".to_string(),
            user_name: "User".to_string(),
            user_location: "Undisclosed".to_string(),
            max_iterations: 15,
            human_input_timeout_secs: 60,
            default_mode: "chat".to_string(),
        }
    }
}

// ── tools ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Base URL of the CORS proxy used by the website-browser tool.
    /// Overridden at runtime by `QUILL_PROXY_URL` when set.
    pub proxy_url: String,
    /// Maximum related topics a web search result may include.
    pub search_max_results: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            proxy_url: String::new(),
            search_max_results: 5,
        }
    }
}

impl ToolsConfig {
    pub fn proxy_url(&self) -> Option<String> {
        env::var("QUILL_PROXY_URL")
            .ok()
            .or_else(|| Some(self.proxy_url.clone()))
            .filter(|url| !url.trim().is_empty())
    }
}

// ── knowledge ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Minimum similarity score a retrieved passage must reach to be used
    /// as grounding context.
    pub similarity_threshold: f32,
    /// When true, retrieved passages are surfaced as a read-only document
    /// in addition to grounding the answer.
    pub surface_retrieval: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            surface_retrieval: false,
        }
    }
}

// ── custom agent ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CustomAgentConfig {
    /// Base URL of the external agent service. Empty means unconfigured.
    /// Overridden at runtime by `QUILL_CUSTOM_AGENT_URL` when set.
    pub agent_url: String,
    /// Include knowledge-store search results in the payload.
    pub include_knowledge_search: bool,
}

impl CustomAgentConfig {
    pub fn agent_url(&self) -> Option<String> {
        env::var("QUILL_CUSTOM_AGENT_URL")
            .ok()
            .or_else(|| Some(self.agent_url.clone()))
            .filter(|url| !url.trim().is_empty())
    }
}

// ── top level ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub knowledge: KnowledgeConfig,
    pub custom: CustomAgentConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields defaults;
    /// a malformed file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
