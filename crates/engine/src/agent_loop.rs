//! The ReAct-style executor: prompt → completion → parse → tool dispatch,
//! repeated until the model declares a final answer, a direct-return tool
//! fires, or the iteration cap is hit.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use quill_llm::{CompletionClient, CompletionRequest};
use quill_tools::ToolRegistry;

use crate::error::EngineError;
use crate::events::{EngineEvent, EventSender, emit};
use crate::parser::{Parsed, ToolAction, parse_completion, thought_of};
use crate::prompt::{PromptInputs, build_agent_prompt};

/// Stop sequence for loop completions: the model must not invent its own
/// observations, so generation halts before any `Observation` line.
pub const OBSERVATION_STOP: &str = "\nObservation";

/// A completed (action, result) pair. Steps are appended in execution order
/// and never reordered or deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStep {
    pub action: ToolAction,
    pub observation: String,
}

/// One loop invocation's inputs. The cancellation token is checked before
/// every iteration; the token/event channels are forwarded to each
/// completion call.
pub struct AgentLoopRequest<'a> {
    pub input: &'a str,
    pub system_message: &'a str,
    pub chat_history: &'a str,
    pub current_document: &'a str,
    pub current_date: &'a str,
    pub max_iterations: usize,
    pub cancel: CancellationToken,
    pub token_tx: Option<mpsc::Sender<String>>,
    pub events: Option<&'a EventSender>,
}

/// Final answer plus the trace that produced it. When a direct-return tool
/// finished the run, its step is the last trace entry.
#[derive(Debug)]
pub struct AgentLoopOutcome {
    pub output: String,
    pub trace: Vec<ExecutionStep>,
}

#[instrument(skip_all, fields(input_len = request.input.len(), max_iterations = request.max_iterations))]
pub async fn run_agent_loop(
    client: &dyn CompletionClient,
    registry: &ToolRegistry,
    request: AgentLoopRequest<'_>,
) -> Result<AgentLoopOutcome, EngineError> {
    let catalog = registry.catalog();
    let names = registry.names();
    let mut trace: Vec<ExecutionStep> = Vec::new();

    for round in 0..request.max_iterations {
        if request.cancel.is_cancelled() {
            info!(round, "invocation cancelled before iteration");
            return Err(EngineError::Cancelled);
        }

        debug!(round, trace_len = trace.len(), "agent loop iteration");
        let prompt = build_agent_prompt(&PromptInputs {
            tool_catalog: &catalog,
            tool_names: &names,
            system_message: request.system_message,
            chat_history: request.chat_history,
            current_date: request.current_date,
            current_document: request.current_document,
            input: request.input,
            trace: &trace,
        });

        emit(request.events, EngineEvent::CompletionStart);
        let completion_request = CompletionRequest {
            prompt,
            stop: vec![OBSERVATION_STOP.to_string()],
            ..CompletionRequest::default()
        };
        let completion = match client
            .complete(completion_request, request.token_tx.clone())
            .await
        {
            Ok(text) => {
                emit(request.events, EngineEvent::CompletionEnd);
                text
            }
            Err(err) => {
                // error replaces end for this completion
                emit(request.events, EngineEvent::Error(err.to_string()));
                return Err(EngineError::Provider(err));
            }
        };

        let action = match parse_completion(&completion)? {
            Parsed::Finish { output } => {
                info!(round, trace_len = trace.len(), "model declared final answer");
                return Ok(AgentLoopOutcome { output, trace });
            }
            Parsed::Action(action) => action,
        };

        let Some(tool) = registry.get(&action.tool) else {
            return Err(EngineError::ToolNotFound(action.tool));
        };

        emit(
            request.events,
            EngineEvent::AgentAction {
                tool: action.tool.clone(),
                tool_input: action.tool_input.clone(),
                thought: thought_of(&action.raw_log),
            },
        );

        info!(round, tool = %action.tool, "dispatching tool");
        match tool.run(&action.tool_input).await {
            Ok(observation) if tool.returns_direct() => {
                // the tool's output IS the answer; no further model call
                trace.push(ExecutionStep { action, observation: observation.clone() });
                return Ok(AgentLoopOutcome { output: observation, trace });
            }
            Ok(observation) => {
                trace.push(ExecutionStep { action, observation });
            }
            Err(err) => {
                // recoverable by design: the model sees the failure as the
                // observation and may try a different action next round
                warn!(tool = %action.tool, %err, "tool execution failed");
                trace.push(ExecutionStep {
                    action,
                    observation: format!("Error: {err}"),
                });
            }
        }
    }

    warn!(max_iterations = request.max_iterations, "agent loop exhausted its iteration cap");
    Err(EngineError::MaxIterations(request.max_iterations))
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use quill_tools::Tool;

    /// Replays a scripted sequence of completions and records every prompt
    /// and stop-sequence list it was called with.
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
        stops: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
                stops: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(
            &self,
            request: CompletionRequest,
            _token_tx: Option<mpsc::Sender<String>>,
        ) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.stops.lock().unwrap().push(request.stop.clone());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => bail!(message),
                None => bail!("script exhausted"),
            }
        }
    }

    struct CountingCalculator {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl Tool for CountingCalculator {
        fn name(&self) -> &str {
            "calculator"
        }
        fn description(&self) -> &str {
            "does math"
        }
        async fn run(&self, input: &str) -> Result<String> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            match input {
                "2+2" => Ok("4".to_string()),
                _ => bail!("bad expression"),
            }
        }
    }

    struct DirectAck;

    #[async_trait]
    impl Tool for DirectAck {
        fn name(&self) -> &str {
            "create-document-or-report"
        }
        fn description(&self) -> &str {
            "creates a document"
        }
        fn returns_direct(&self) -> bool {
            true
        }
        async fn run(&self, _input: &str) -> Result<String> {
            Ok("I've created the document for you.".to_string())
        }
    }

    fn registry_with(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::default();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    fn request<'a>(events: Option<&'a EventSender>) -> AgentLoopRequest<'a> {
        AgentLoopRequest {
            input: "what is 2+2?",
            system_message: "",
            chat_history: "",
            current_document: "",
            current_date: "Mon Jan 05 2026",
            max_iterations: 15,
            cancel: CancellationToken::new(),
            token_tx: None,
            events,
        }
    }

    #[tokio::test]
    async fn immediate_final_answer_leaves_trace_empty() {
        let client = ScriptedClient::new(vec![Ok("Thought: easy\nFinal Answer: 4".into())]);
        let registry = registry_with(vec![Arc::new(CountingCalculator {
            invocations: AtomicUsize::new(0),
        })]);

        let outcome = run_agent_loop(&client, &registry, request(None)).await.unwrap();
        assert_eq!(outcome.output, "4");
        assert!(outcome.trace.is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn observation_is_appended_and_replayed_in_next_prompt() {
        let client = ScriptedClient::new(vec![
            Ok("Thought: math\nAction: calculator\nAction Input: 2+2".into()),
            Ok("Thought: done\nFinal Answer: the answer is 4".into()),
        ]);
        let calculator = Arc::new(CountingCalculator { invocations: AtomicUsize::new(0) });
        let registry = registry_with(vec![calculator.clone()]);

        let outcome = run_agent_loop(&client, &registry, request(None)).await.unwrap();
        assert_eq!(outcome.output, "the answer is 4");
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].observation, "4");
        assert_eq!(calculator.invocations.load(Ordering::SeqCst), 1);

        // second prompt replays the observation verbatim
        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("\nObservation: 4\nThought:"));
        assert!(!prompts[0].contains("Observation: 4"));
    }

    #[tokio::test]
    async fn every_loop_completion_carries_the_observation_stop_sequence() {
        let client = ScriptedClient::new(vec![
            Ok("Thought: math\nAction: calculator\nAction Input: 2+2".into()),
            Ok("Thought: done\nFinal Answer: 4".into()),
        ]);
        let registry = registry_with(vec![Arc::new(CountingCalculator {
            invocations: AtomicUsize::new(0),
        })]);

        run_agent_loop(&client, &registry, request(None)).await.unwrap();

        let stops = client.stops.lock().unwrap();
        assert_eq!(stops.len(), 2);
        for stop in stops.iter() {
            assert_eq!(stop.as_slice(), &[OBSERVATION_STOP.to_string()]);
        }
    }

    #[tokio::test]
    async fn final_answer_after_steps_keeps_trace_and_skips_tools() {
        let client = ScriptedClient::new(vec![
            Ok("Action: calculator\nAction Input: 2+2".into()),
            Ok("Action: calculator\nAction Input: 2+2".into()),
            Ok("Final Answer: 42".into()),
        ]);
        let calculator = Arc::new(CountingCalculator { invocations: AtomicUsize::new(0) });
        let registry = registry_with(vec![calculator.clone()]);

        let outcome = run_agent_loop(&client, &registry, request(None)).await.unwrap();
        assert_eq!(outcome.output, "42");
        assert_eq!(outcome.trace.len(), 2);
        // no tool ran on the final iteration
        assert_eq!(calculator.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn direct_return_tool_finishes_without_another_model_call() {
        let client = ScriptedClient::new(vec![Ok(
            "Action: create-document-or-report\nAction Input: <title>Foo</title> <content>Bar</content>"
                .into(),
        )]);
        let registry = registry_with(vec![Arc::new(DirectAck)]);

        let outcome = run_agent_loop(&client, &registry, request(None)).await.unwrap();
        assert_eq!(outcome.output, "I've created the document for you.");
        assert_eq!(client.calls(), 1);
        // the direct step is the last (and only) trace entry
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace[0].action.tool, "create-document-or-report");
        assert_eq!(outcome.trace[0].observation, outcome.output);
    }

    #[tokio::test]
    async fn unknown_tool_is_fatal() {
        let client = ScriptedClient::new(vec![Ok("Action: frobnicator\nAction Input: x".into())]);
        let registry = registry_with(vec![]);

        let err = run_agent_loop(&client, &registry, request(None)).await.unwrap_err();
        match err {
            EngineError::ToolNotFound(name) => assert_eq!(name, "frobnicator"),
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_completion_is_fatal_and_runs_no_tool() {
        let client = ScriptedClient::new(vec![Ok("let me just chat instead".into())]);
        let calculator = Arc::new(CountingCalculator { invocations: AtomicUsize::new(0) });
        let registry = registry_with(vec![calculator.clone()]);

        let err = run_agent_loop(&client, &registry, request(None)).await.unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
        assert_eq!(calculator.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_failure_becomes_an_error_observation() {
        let client = ScriptedClient::new(vec![
            Ok("Action: calculator\nAction Input: nonsense".into()),
            Ok("Final Answer: I could not compute that".into()),
        ]);
        let registry = registry_with(vec![Arc::new(CountingCalculator {
            invocations: AtomicUsize::new(0),
        })]);

        let outcome = run_agent_loop(&client, &registry, request(None)).await.unwrap();
        assert_eq!(outcome.output, "I could not compute that");
        assert_eq!(outcome.trace.len(), 1);
        assert!(outcome.trace[0].observation.starts_with("Error:"));

        // the error observation is replayed so the model can recover
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[1].contains("Observation: Error:"));
    }

    #[tokio::test]
    async fn iteration_cap_terminates_the_loop() {
        let replies = (0..20)
            .map(|_| Ok("Action: calculator\nAction Input: 2+2".to_string()))
            .collect();
        let client = ScriptedClient::new(replies);
        let registry = registry_with(vec![Arc::new(CountingCalculator {
            invocations: AtomicUsize::new(0),
        })]);

        let mut req = request(None);
        req.max_iterations = 3;
        let err = run_agent_loop(&client, &registry, req).await.unwrap_err();
        assert!(matches!(err, EngineError::MaxIterations(3)));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn provider_failure_is_fatal_and_replaces_completion_end() {
        let (events, mut rx) = tokio::sync::broadcast::channel(16);
        let client = ScriptedClient::new(vec![Err("connection refused".into())]);
        let registry = registry_with(vec![]);

        let err = run_agent_loop(&client, &registry, request(Some(&events)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));

        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::CompletionStart));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Error(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_any_completion() {
        let client = ScriptedClient::new(vec![Ok("Final Answer: too late".into())]);
        let registry = registry_with(vec![]);

        let mut req = request(None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        req.cancel = cancel;

        let err = run_agent_loop(&client, &registry, req).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn agent_action_event_fires_before_the_tool_runs() {
        let (events, mut rx) = tokio::sync::broadcast::channel(16);
        let client = ScriptedClient::new(vec![
            Ok("Thought: I need the sum\nAction: calculator\nAction Input: 2+2".into()),
            Ok("Final Answer: 4".into()),
        ]);
        let registry = registry_with(vec![Arc::new(CountingCalculator {
            invocations: AtomicUsize::new(0),
        })]);

        run_agent_loop(&client, &registry, request(Some(&events))).await.unwrap();

        let mut saw_action = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::AgentAction { tool, tool_input, thought } = event {
                assert_eq!(tool, "calculator");
                assert_eq!(tool_input, "2+2");
                assert_eq!(thought, "Thought: I need the sum");
                saw_action = true;
            }
        }
        assert!(saw_action);
    }
}
