use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::modes::knowledge::{KnowledgeStore, filter_and_combine};
use crate::modes::{AgentResponse, ModeContext, ModeHandler, ModeIo, render_history};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Body posted to a self-hosted agent endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomAgentPayload {
    pub user_message: String,
    pub user_name: String,
    pub user_location: String,
    pub custom_prompt: String,
    pub chat_history: String,
    pub current_document: String,
    pub similarity_search_results: String,
}

#[derive(Debug, Deserialize)]
struct CustomAgentReply {
    response: String,
}

/// Delegates the whole turn to an external agent server. No token
/// streaming; the reply arrives as one body.
pub struct CustomMode {
    agent_url: Option<String>,
    store: Option<Arc<dyn KnowledgeStore>>,
    threshold: f32,
    http: reqwest::Client,
}

impl CustomMode {
    pub fn new(
        agent_url: Option<String>,
        store: Option<Arc<dyn KnowledgeStore>>,
        threshold: f32,
    ) -> Self {
        Self {
            agent_url,
            store,
            threshold,
            http: reqwest::Client::new(),
        }
    }

    async fn search_results(&self, message: &str, ctx: &ModeContext) -> String {
        if !ctx.knowledge_search {
            return String::new();
        }
        let Some(store) = &self.store else {
            return String::new();
        };
        match store.search(message).await {
            Ok(passages) => filter_and_combine(&passages, self.threshold),
            Err(err) => {
                warn!(%err, "knowledge search for custom agent failed");
                String::new()
            }
        }
    }
}

pub(crate) fn build_payload(
    message: &str,
    ctx: &ModeContext,
    similarity_search_results: String,
) -> CustomAgentPayload {
    CustomAgentPayload {
        user_message: message.to_string(),
        user_name: ctx.user_name.clone(),
        user_location: ctx.user_location.clone(),
        custom_prompt: ctx.system_note.clone().unwrap_or_default(),
        chat_history: render_history(&ctx.chat_history),
        current_document: ctx.current_document.clone(),
        similarity_search_results,
    }
}

#[async_trait]
impl ModeHandler for CustomMode {
    async fn handle(
        &self,
        message: &str,
        ctx: &ModeContext,
        io: &ModeIo,
    ) -> Result<AgentResponse, EngineError> {
        let Some(url) = &self.agent_url else {
            return Ok(AgentResponse {
                response: "Please set a custom agent URL in the settings menu".to_string(),
            });
        };
        if io.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let results = self.search_results(message, ctx).await;
        let payload = build_payload(message, ctx, results);
        let endpoint = format!("{}/v1/agent", url.trim_end_matches('/'));
        debug!(%endpoint, "forwarding turn to custom agent");

        let reply = self
            .http
            .post(&endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .context("custom agent request failed")
            .map_err(EngineError::Provider)?
            .json::<CustomAgentReply>()
            .await
            .context("custom agent returned an unexpected body")
            .map_err(EngineError::Provider)?;

        Ok(AgentResponse { response: reply.response })
    }
}
