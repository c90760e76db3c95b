//! Mode router: selects one of five agent strategies and normalizes them
//! into a single request/response and streaming-callback contract.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use quill_config::AppConfig;
use quill_llm::{ChatMessage, CompletionClient, CompletionRequest, Role};
use quill_tools::{DocumentSink, ToolRegistry};

use crate::error::EngineError;
use crate::events::{EngineEvent, EventSender, emit};

mod agent;
mod chat;
mod custom;
mod document;
mod knowledge;

pub use agent::AgentLoopMode;
pub use chat::ChatMode;
pub use custom::{CustomAgentPayload, CustomMode};
pub use document::DocumentMode;
pub use knowledge::{KnowledgeMode, KnowledgeStore, ScoredPassage, filter_and_combine};

/// User-facing reply when a fatal engine error aborts the invocation.
pub const APOLOGY: &str = "I'm sorry, I ran into a problem answering that. Please try again.";

// ── mode selection ───────────────────────────────────────────────────────────

/// The agent strategy for a conversational turn. Stored per workspace;
/// may be overridden per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Chat,
    Document,
    Knowledge,
    Custom,
    Agent,
}

impl FromStr for AgentMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "document" => Ok(Self::Document),
            "knowledge" => Ok(Self::Knowledge),
            "custom" => Ok(Self::Custom),
            "agent" => Ok(Self::Agent),
            other => Err(EngineError::Configuration(format!("unknown agent mode {other:?}"))),
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chat => "chat",
            Self::Document => "document",
            Self::Knowledge => "knowledge",
            Self::Custom => "custom",
            Self::Agent => "agent",
        };
        f.write_str(name)
    }
}

// ── request/response contract ────────────────────────────────────────────────

/// Uniform return value regardless of mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub response: String,
}

/// Workspace context bundled with each query.
#[derive(Debug, Clone, Default)]
pub struct ModeContext {
    pub user_name: String,
    pub user_location: String,
    /// Per-workspace custom system note; replaces the default persona.
    pub system_note: Option<String>,
    pub chat_history: Vec<ChatMessage>,
    /// Current editable document text.
    pub current_document: String,
    /// Document-mode task description.
    pub task: Option<String>,
    /// Document-mode highlighted excerpt.
    pub highlighted: Option<String>,
    /// Knowledge mode: surface retrieved passages as a read-only document.
    pub surface_retrieval: bool,
    /// Custom mode: include knowledge-search results in the payload.
    pub knowledge_search: bool,
}

/// Per-call channels: token stream, observer events, cancellation.
#[derive(Clone, Default)]
pub struct ModeIo {
    pub token_tx: Option<mpsc::Sender<String>>,
    pub events: Option<EventSender>,
    pub cancel: CancellationToken,
}

/// One agent strategy. At most one completion call per invocation notifies
/// the streaming channels (the agent loop notifies once per iteration).
#[async_trait::async_trait]
pub trait ModeHandler: Send + Sync {
    async fn handle(
        &self,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> Result<AgentResponse, EngineError>;
}

// ── router ───────────────────────────────────────────────────────────────────

pub struct ModeRouter {
    chat: ChatMode,
    document: DocumentMode,
    knowledge: KnowledgeMode,
    custom: CustomMode,
    agent: AgentLoopMode,
}

impl ModeRouter {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: ToolRegistry,
        knowledge_store: Option<Arc<dyn KnowledgeStore>>,
        documents: Arc<dyn DocumentSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            chat: ChatMode::new(client.clone(), config.agent.name.clone()),
            document: DocumentMode::new(client.clone()),
            knowledge: KnowledgeMode::new(
                client.clone(),
                knowledge_store.clone(),
                documents,
                config.knowledge.similarity_threshold,
            ),
            custom: CustomMode::new(config.custom.agent_url(), knowledge_store, config.knowledge.similarity_threshold),
            agent: AgentLoopMode::new(client, registry, config.agent.max_iterations),
        }
    }

    /// Dispatch to the selected handler and normalize fatal errors into the
    /// apology string plus an `Error` event notification.
    pub async fn route(
        &self,
        mode: AgentMode,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> AgentResponse {
        debug!(%mode, message_len = message.len(), "routing query");
        let handler: &dyn ModeHandler = match mode {
            AgentMode::Chat => &self.chat,
            AgentMode::Document => &self.document,
            AgentMode::Knowledge => &self.knowledge,
            AgentMode::Custom => &self.custom,
            AgentMode::Agent => &self.agent,
        };

        match handler.handle(message, ctx, io).await {
            Ok(response) => response,
            Err(err) => {
                warn!(%mode, %err, "mode handler failed");
                emit(io.events.as_ref(), EngineEvent::Error(err.to_string()));
                AgentResponse { response: APOLOGY.to_string() }
            }
        }
    }
}

// ── shared helpers ───────────────────────────────────────────────────────────

/// Run one completion with the streaming lifecycle: start → tokens → end,
/// error replacing end. Checks cancellation before issuing the call.
pub(crate) async fn streamed_completion(
    client: &dyn CompletionClient,
    request: CompletionRequest,
    io: &ModeIo,
) -> Result<String, EngineError> {
    if io.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    emit(io.events.as_ref(), EngineEvent::CompletionStart);
    match client.complete(request, io.token_tx.clone()).await {
        Ok(text) => {
            emit(io.events.as_ref(), EngineEvent::CompletionEnd);
            Ok(text)
        }
        Err(err) => {
            emit(io.events.as_ref(), EngineEvent::Error(err.to_string()));
            Err(EngineError::Provider(err))
        }
    }
}

/// Render prior turns as `role: text` lines for prompt embedding.
pub(crate) fn render_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}: {}", msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn human_readable_date() -> String {
    chrono::Local::now().format("%a %b %d %Y").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
