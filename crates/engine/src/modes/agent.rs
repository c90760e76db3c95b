use std::sync::Arc;

use async_trait::async_trait;

use quill_llm::CompletionClient;
use quill_tools::ToolRegistry;

use crate::agent_loop::{AgentLoopRequest, run_agent_loop};
use crate::error::EngineError;
use crate::modes::{
    AgentResponse, ModeContext, ModeHandler, ModeIo, human_readable_date, render_history,
};

/// Tool-using mode: the full reasoning loop over the registered tools.
pub struct AgentLoopMode {
    client: Arc<dyn CompletionClient>,
    registry: ToolRegistry,
    max_iterations: usize,
}

impl AgentLoopMode {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        registry: ToolRegistry,
        max_iterations: usize,
    ) -> Self {
        Self { client, registry, max_iterations }
    }
}

#[async_trait]
impl ModeHandler for AgentLoopMode {
    async fn handle(
        &self,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> Result<AgentResponse, EngineError> {
        let history = render_history(&ctx.chat_history);
        let date = human_readable_date();
        let outcome = run_agent_loop(
            self.client.as_ref(),
            &self.registry,
            AgentLoopRequest {
                input: message,
                system_message: ctx.system_note.as_deref().unwrap_or(""),
                chat_history: &history,
                current_document: &ctx.current_document,
                current_date: &date,
                max_iterations: self.max_iterations,
                cancel: io.cancel.clone(),
                token_tx: io.token_tx.clone(),
                events: io.events.as_ref(),
            },
        )
        .await?;
        Ok(AgentResponse { response: outcome.output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::test_support::RecordingClient;
    use quill_llm::ChatMessage;

    #[tokio::test]
    async fn final_answer_flows_back_as_the_response() {
        let client = RecordingClient::replying("Thought: simple\nFinal Answer: done");
        let mode = AgentLoopMode::new(client.clone(), ToolRegistry::default(), 15);

        let response = mode
            .handle("do the thing", &ModeContext::default(), &ModeIo::default())
            .await
            .unwrap();
        assert_eq!(response.response, "done");
    }

    #[tokio::test]
    async fn workspace_context_lands_in_the_loop_prompt() {
        let client = RecordingClient::replying("Final Answer: ok");
        let mode = AgentLoopMode::new(client.clone(), ToolRegistry::default(), 15);

        let ctx = ModeContext {
            chat_history: vec![ChatMessage::user("remember this")],
            current_document: "the working draft".into(),
            ..ModeContext::default()
        };
        mode.handle("summarize", &ctx, &ModeIo::default()).await.unwrap();

        let prompt = client.last_request().prompt;
        assert!(prompt.contains("user: remember this"));
        assert!(prompt.contains("the working draft"));
        assert!(prompt.contains("Question: summarize"));
    }

    #[tokio::test]
    async fn provider_failure_propagates_as_an_engine_error() {
        let client = RecordingClient::failing("down");
        let mode = AgentLoopMode::new(client, ToolRegistry::default(), 15);

        let err = mode
            .handle("hi", &ModeContext::default(), &ModeIo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));
    }
}
