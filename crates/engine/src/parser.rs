//! Classifier for raw model completions.
//!
//! The model-facing protocol is a two-rule grammar with fixed precedence:
//!
//! 1. A completion containing `Final Answer:` is finished; the answer is
//!    everything after the *last* occurrence, trimmed. This rule wins even
//!    when a well-formed action pair is also present.
//! 2. Otherwise an `Action:` line followed by `Action Input:` (greedy,
//!    dot-all — tool input may span the rest of the text) is a tool request.
//!
//! Anything else is a parse failure carrying the offending text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::EngineError;

pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Action: (.*)\nAction Input: (.*)").expect("static regex"));

/// One parsed decision from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAction {
    /// Tool name, taken verbatim — lookup is exact and case-sensitive.
    pub tool: String,
    pub tool_input: String,
    /// The full original completion, replayed into the scratchpad.
    pub raw_log: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Finish { output: String },
    Action(ToolAction),
}

pub fn parse_completion(text: &str) -> Result<Parsed, EngineError> {
    if let Some(index) = text.rfind(FINAL_ANSWER_MARKER) {
        let output = text[index + FINAL_ANSWER_MARKER.len()..].trim().to_string();
        return Ok(Parsed::Finish { output });
    }

    let Some(captures) = ACTION_RE.captures(text) else {
        return Err(EngineError::Parse(text.to_string()));
    };

    Ok(Parsed::Action(ToolAction {
        tool: captures[1].trim().to_string(),
        tool_input: captures[2].trim().trim_matches('"').to_string(),
        raw_log: text.to_string(),
    }))
}

/// The model's thought is whatever precedes the `Action:` line in the raw
/// log; surfaced to observers for live display.
pub fn thought_of(raw_log: &str) -> String {
    raw_log
        .split("Action:")
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_answer_is_extracted_and_trimmed() {
        let parsed = parse_completion("Thought: done\nFinal Answer:  42  ").unwrap();
        assert_eq!(parsed, Parsed::Finish { output: "42".into() });
    }

    #[test]
    fn last_final_answer_marker_wins() {
        let text = "Final Answer: draft\nThought: wait\nFinal Answer: the real one";
        let parsed = parse_completion(text).unwrap();
        assert_eq!(parsed, Parsed::Finish { output: "the real one".into() });
    }

    #[test]
    fn finish_beats_a_well_formed_action_pair() {
        let text = "Action: calculator\nAction Input: 2+2\nFinal Answer: 4";
        let parsed = parse_completion(text).unwrap();
        assert_eq!(parsed, Parsed::Finish { output: "4".into() });
    }

    #[test]
    fn action_pair_is_parsed() {
        let text = "Thought: I should compute this\nAction: calculator\nAction Input: 2+2";
        match parse_completion(text).unwrap() {
            Parsed::Action(action) => {
                assert_eq!(action.tool, "calculator");
                assert_eq!(action.tool_input, "2+2");
                assert_eq!(action.raw_log, text);
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn quotes_around_tool_input_are_stripped() {
        let text = "Action: web-search\nAction Input: \"rust regex crate\"";
        match parse_completion(text).unwrap() {
            Parsed::Action(action) => assert_eq!(action.tool_input, "rust regex crate"),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn tool_input_spans_multiple_lines() {
        let text = "Action: create-document-or-report\nAction Input: <title>T</title>\n<content>line one\nline two</content>";
        match parse_completion(text).unwrap() {
            Parsed::Action(action) => {
                assert_eq!(action.tool, "create-document-or-report");
                assert!(action.tool_input.contains("line one\nline two"));
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn tool_name_is_verbatim_and_untrimmed_of_case() {
        let text = "Action: Calculator\nAction Input: 1+1";
        match parse_completion(text).unwrap() {
            Parsed::Action(action) => assert_eq!(action.tool, "Calculator"),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_text_fails_with_the_offending_text() {
        let err = parse_completion("I would simply like to chat").unwrap_err();
        match err {
            EngineError::Parse(text) => assert_eq!(text, "I would simply like to chat"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn action_without_input_is_a_parse_error() {
        assert!(parse_completion("Action: calculator").is_err());
    }

    #[test]
    fn thought_precedes_the_action_line() {
        let log = "Thought: I need the sum\nAction: calculator\nAction Input: 1+2";
        assert_eq!(thought_of(log), "Thought: I need the sum");
        assert_eq!(thought_of("no action here"), "no action here");
    }
}
