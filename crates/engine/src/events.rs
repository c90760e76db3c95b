use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Observer notifications mirrored to whoever subscribes (UI, realtime
/// channel). Completion lifecycle ordering per completion call is
/// `CompletionStart` → `CompletionEnd`, with `Error` replacing
/// `CompletionEnd` when the call fails. Individual tokens are not mirrored
/// here; they arrive over the per-call `mpsc` channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    CompletionStart,
    CompletionEnd,
    /// A parsed action, published before the named tool runs so callers can
    /// display the model's live reasoning.
    AgentAction {
        tool: String,
        tool_input: String,
        thought: String,
    },
    DocumentCreated {
        title: String,
    },
    Error(String),
}

pub type EventSender = broadcast::Sender<EngineEvent>;

/// Fire-and-forget emit; a missing channel or zero subscribers is fine.
pub(crate) fn emit(events: Option<&EventSender>, event: EngineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
