use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use quill_llm::{CompletionClient, CompletionRequest};
use quill_tools::DocumentSink;

use crate::error::EngineError;
use crate::events::{EngineEvent, emit};
use crate::modes::{
    AgentResponse, ModeContext, ModeHandler, ModeIo, render_history, streamed_completion,
};

/// Title of the read-only document surfaced when the workspace wants to see
/// raw retrieval results.
const RETRIEVAL_RESULTS_TITLE: &str = "Retrieval Results";

/// A retrieved passage with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub content: String,
    pub score: f32,
}

/// Vector similarity store collaborator; implemented by the host.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ScoredPassage>>;
}

/// Keep passages at or above the threshold, in ranked order, joined as one
/// grounding text. All candidates below the threshold yield an empty string.
pub fn filter_and_combine(passages: &[ScoredPassage], threshold: f32) -> String {
    passages
        .iter()
        .filter(|passage| passage.score >= threshold)
        .map(|passage| passage.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Retrieval-augmented answering over the workspace knowledge store.
pub struct KnowledgeMode {
    client: Arc<dyn CompletionClient>,
    store: Option<Arc<dyn KnowledgeStore>>,
    documents: Arc<dyn DocumentSink>,
    threshold: f32,
}

impl KnowledgeMode {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Option<Arc<dyn KnowledgeStore>>,
        documents: Arc<dyn DocumentSink>,
        threshold: f32,
    ) -> Self {
        Self { client, store, documents, threshold }
    }
}

fn rag_prompt(message: &str, context: &str, history: &str) -> String {
    let context = if context.is_empty() { "(no relevant passages found)" } else { context };
    format!(
        "Answer the question using the context below. When the context does not \
         cover the question, say so instead of guessing.\n\n\
         CONTEXT:\n{context}\n\n\
         CONVERSATION SO FAR:\n{history}\n\n\
         QUESTION: {message}"
    )
}

#[async_trait]
impl ModeHandler for KnowledgeMode {
    async fn handle(
        &self,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> Result<AgentResponse, EngineError> {
        let Some(store) = &self.store else {
            return Ok(AgentResponse {
                response: "The knowledge store is not connected, please try reloading the page."
                    .to_string(),
            });
        };

        // A failed search degrades to an empty grounding context rather than
        // aborting; the completion still answers from general knowledge.
        let combined = match store.search(message).await {
            Ok(passages) => {
                debug!(candidates = passages.len(), "similarity search returned");
                filter_and_combine(&passages, self.threshold)
            }
            Err(err) => {
                warn!(%err, "knowledge search failed; answering without grounding");
                String::new()
            }
        };

        let request = CompletionRequest::from_prompt(rag_prompt(
            message,
            &combined,
            &render_history(&ctx.chat_history),
        ));
        let response = streamed_completion(self.client.as_ref(), request, io).await?;

        if ctx.surface_retrieval {
            match self
                .documents
                .create_document(RETRIEVAL_RESULTS_TITLE, &combined)
                .await
            {
                Ok(()) => emit(
                    io.events.as_ref(),
                    EngineEvent::DocumentCreated { title: RETRIEVAL_RESULTS_TITLE.to_string() },
                ),
                Err(err) => warn!(%err, "failed to surface retrieval results"),
            }
        }

        Ok(AgentResponse { response })
    }
}
