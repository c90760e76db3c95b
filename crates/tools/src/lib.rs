use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Trait implemented by every tool the agent loop can dispatch to.
///
/// Tools are string-in/string-out: the model's `Action Input` text arrives
/// verbatim (after quote stripping) and the returned string becomes the
/// step's observation. A tool with `returns_direct() == true` short-circuits
/// the loop: its successful output is the final answer and no further model
/// call happens.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn returns_direct(&self) -> bool {
        false
    }
    async fn run(&self, input: &str) -> Result<String>;
}

/// Central registry for all available tools, owned for the lifetime of one
/// orchestration session. Lookup is by exact, case-sensitive name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(|tool| tool.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One `name: description` line per tool, in registration order.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|tool| format!("{}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }
}

// ── collaborator seams ───────────────────────────────────────────────────────

/// Side channel for pushing a new document into the host workspace.
/// Implemented by the embedding application; tools and mode handlers only
/// ever hold it behind an `Arc`.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn create_document(&self, title: &str, content: &str) -> Result<()>;
}

/// Request/response channel to a human operator, used by the human-input
/// tool. `None` means no answer arrived through the host environment's
/// interaction window; the tool supplies its own fallback in that case.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn ask(&self, question: &str) -> Option<String>;
}

pub mod builtins;
pub mod calc;
pub use builtins::{
    CalculatorTool, ColorTokensTool, CreateDocumentTool, HumanInputTool, WebSearchTool,
    WebsiteBrowserTool,
};

// ── ToolRegistry tests ───────────────────────────────────────────────────────
