//! Agent orchestration engine: a text-protocol reasoning loop over a tool
//! registry, plus a mode router that normalizes five agent strategies into
//! one request/response contract.

pub mod agent_loop;
pub mod error;
pub mod events;
pub mod modes;
pub mod parser;
pub mod prompt;

pub use agent_loop::{
    AgentLoopOutcome, AgentLoopRequest, ExecutionStep, OBSERVATION_STOP, run_agent_loop,
};
pub use error::EngineError;
pub use events::{EngineEvent, EventSender};
pub use modes::{
    APOLOGY, AgentLoopMode, AgentMode, AgentResponse, ChatMode, CustomAgentPayload, CustomMode,
    DocumentMode, KnowledgeMode, KnowledgeStore, ModeContext, ModeHandler, ModeIo, ModeRouter,
    ScoredPassage, filter_and_combine,
};
pub use parser::{FINAL_ANSWER_MARKER, Parsed, ToolAction, parse_completion};
pub use prompt::{PromptInputs, build_agent_prompt};
