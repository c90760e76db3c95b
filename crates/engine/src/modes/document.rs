use std::sync::Arc;

use async_trait::async_trait;

use quill_llm::{CompletionClient, CompletionRequest};

use crate::error::EngineError;
use crate::modes::{AgentResponse, ModeContext, ModeHandler, ModeIo, streamed_completion};

/// Document editing: the current document plus an explicit task and
/// optional highlighted excerpt replace chat history as context.
pub struct DocumentMode {
    client: Arc<dyn CompletionClient>,
}

impl DocumentMode {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }
}

fn build_task_prompt(message: &str, ctx: &ModeContext) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(task) = ctx.task.as_deref().filter(|task| !task.is_empty()) {
        parts.push(format!("Task: {task}"));
    }
    if let Some(highlighted) = ctx.highlighted.as_deref().filter(|text| !text.is_empty()) {
        parts.push(format!("Highlighted excerpt:\n{highlighted}"));
    }
    parts.push(message.to_string());
    parts.join("\n\n")
}

#[async_trait]
impl ModeHandler for DocumentMode {
    async fn handle(
        &self,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> Result<AgentResponse, EngineError> {
        let system = format!(
            "You are a writing assistant working on the user's current document.\n\
             Apply the requested change or answer the question using the document as context.\n\n\
             DOCUMENT:\n{}",
            ctx.current_document,
        );
        let request = CompletionRequest {
            system: Some(system),
            history: Vec::new(),
            prompt: build_task_prompt(message, ctx),
            stop: Vec::new(),
        };
        let response = streamed_completion(self.client.as_ref(), request, io).await?;
        Ok(AgentResponse { response })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::RecordingClient;

    #[tokio::test]
    async fn document_and_task_frame_the_request() {
        let client = RecordingClient::replying("rewritten");
        let mode = DocumentMode::new(client.clone());

        let ctx = ModeContext {
            current_document: "Draft: the quick brown fox".into(),
            task: Some("tighten the prose".into()),
            highlighted: Some("the quick brown fox".into()),
            ..ModeContext::default()
        };
        let response = mode.handle("make it punchier", &ctx, &ModeIo::default()).await.unwrap();
        assert_eq!(response.response, "rewritten");

        let request = client.last_request();
        assert!(request.system.unwrap().contains("Draft: the quick brown fox"));
        assert!(request.prompt.contains("Task: tighten the prose"));
        assert!(request.prompt.contains("Highlighted excerpt:\nthe quick brown fox"));
        assert!(request.prompt.ends_with("make it punchier"));
        // chat history does not leak into document mode
        assert!(request.history.is_empty());
    }

    #[tokio::test]
    async fn missing_task_and_highlight_leave_only_the_message() {
        let client = RecordingClient::replying("ok");
        let mode = DocumentMode::new(client.clone());

        let ctx = ModeContext { current_document: "doc".into(), ..ModeContext::default() };
        mode.handle("summarize", &ctx, &ModeIo::default()).await.unwrap();

        assert_eq!(client.last_request().prompt, "summarize");
    }
}
