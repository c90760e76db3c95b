use std::sync::Arc;

use async_trait::async_trait;

use quill_llm::{CompletionClient, CompletionRequest};

use crate::error::EngineError;
use crate::modes::{
    AgentResponse, ModeContext, ModeHandler, ModeIo, human_readable_date, streamed_completion,
};

/// Plain conversation: one streamed completion over the message plus prior
/// history, under either the workspace's custom note or a default persona.
pub struct ChatMode {
    client: Arc<dyn CompletionClient>,
    assistant_name: String,
}

impl ChatMode {
    pub fn new(client: Arc<dyn CompletionClient>, assistant_name: String) -> Self {
        Self { client, assistant_name }
    }

    fn system_prompt(&self, ctx: &ModeContext) -> String {
        match &ctx.system_note {
            Some(note) => format!(
                "Follow these rules from the user for the rest of the conversation:\n{note}"
            ),
            None => format!(
                "You are {name}, a helpful assistant embedded in the user's workspace.\n\
                 The user's name is {user} and they are located in {location}.\n\
                 Current date: {date}.\n\
                 Be direct, specific, and conversational.",
                name = self.assistant_name,
                user = ctx.user_name,
                location = ctx.user_location,
                date = human_readable_date(),
            ),
        }
    }
}

#[async_trait]
impl ModeHandler for ChatMode {
    async fn handle(
        &self,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> Result<AgentResponse, EngineError> {
        let request = CompletionRequest {
            system: Some(self.system_prompt(ctx)),
            history: ctx.chat_history.clone(),
            prompt: message.to_string(),
            stop: Vec::new(),
        };
        let response = streamed_completion(self.client.as_ref(), request, io).await?;
        Ok(AgentResponse { response })
    }
}
