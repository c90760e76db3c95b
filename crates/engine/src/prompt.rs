//! Prompt assembly for the agent loop.
//!
//! Pure functions of their inputs: the same trace always yields the same
//! prompt text. The scratchpad is rebuilt from the execution trace on every
//! call — the trace, not a stored running string, is the single source of
//! truth for what has happened so far.

use crate::agent_loop::ExecutionStep;

const PREFIX: &str = "You are an intelligent digital worker. Use the research tools to work through \
the user's request, then deliver the result to the user.\n\
You must use one of the following tools for your response:";

/// All pre-computed data needed to assemble one agent-loop prompt.
pub struct PromptInputs<'a> {
    /// One `name: description` line per tool, registry order.
    pub tool_catalog: &'a str,
    pub tool_names: &'a [String],
    /// Per-workspace custom rules; empty when the workspace has none.
    pub system_message: &'a str,
    /// Prior-turn history rendered as `role: text` lines.
    pub chat_history: &'a str,
    pub current_date: &'a str,
    pub current_document: &'a str,
    pub input: &'a str,
    pub trace: &'a [ExecutionStep],
}

/// The fixed output-format block. The five field labels are a wire contract
/// with the model; changing them breaks the output parser.
fn format_instructions(tool_names: &[String]) -> String {
    format!(
        "You must use the following format for your output:\n\n\
         Question: the input question you must answer\n\
         Thought: you should always think about what to do\n\
         Action: the action to take, must be one of [{}]\n\
         Action Input: the input to the action\n\
         Observation: the result of the action\n\
         ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original input question",
        tool_names.join(", "),
    )
}

/// Replay of every (action, observation) pair to date, in execution order.
fn build_scratchpad(trace: &[ExecutionStep]) -> String {
    trace.iter().fold(String::new(), |mut scratchpad, step| {
        scratchpad.push_str(&step.action.raw_log);
        scratchpad.push_str("\n\nObservation: ");
        scratchpad.push_str(&step.observation);
        scratchpad.push_str("\nThought:");
        scratchpad
    })
}

/// Assemble the full prompt: directive prefix, tool catalog, format
/// instructions, then the suffix embedding date, custom rules, history, the
/// user input, and the scratchpad replay.
pub fn build_agent_prompt(inputs: &PromptInputs<'_>) -> String {
    let instructions = format_instructions(inputs.tool_names);
    let scratchpad = build_scratchpad(inputs.trace);

    format!(
        "{PREFIX}\n\n\
         {catalog}\n\n\
         {instructions}\n\n\
         Additional information:\n\
         Current date: {date}\n\
         ---------------\n\
         Additional rules to conform to:\n\
         {system_message}\n\
         ----------------\n\
         Current document:\n\
         {document}\n\
         ----------------\n\
         Relevant pieces of previous conversation:\n\
         {history}\n\
         ----------------\n\
         Question: {input}\n\
         Thought:{scratchpad}",
        catalog = inputs.tool_catalog,
        date = inputs.current_date,
        system_message = inputs.system_message,
        document = inputs.current_document,
        history = inputs.chat_history,
        input = inputs.input,
    )
}
