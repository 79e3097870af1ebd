// Parsing of agent output in the Thought / Action / Final Answer format

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

static ACTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Action\s*\d*\s*:\s*(.*?)\s*Action\s*\d*\s*Input\s*\d*\s*:\s*(.*)")
        .expect("action regex should be valid")
});

static ACTION_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Action\s*\d*\s*:").expect("action line regex should be valid")
});

static CODE_FENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("code fence regex should be valid")
});

const FINAL_ANSWER: &str = "Final Answer:";
const OBSERVATION: &str = "\nObservation:";

/// One step of agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    /// The agent wants to run a tool.
    Action {
        /// Reasoning written before the action
        thought: String,
        /// Tool name as written by the model
        tool: String,
        /// Raw tool input
        input: String,
    },
    /// The agent is done.
    Finish {
        /// Reasoning written before the answer
        thought: String,
        /// The answer
        output: String,
    },
}

/// Ways agent output can fail to follow the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Neither an action nor a final answer was written
    #[error("missing 'Action:' after 'Thought:'")]
    MissingAction,
    /// An action was named without input
    #[error("missing 'Action Input:' after 'Action:'")]
    MissingActionInput,
    /// Both an action and a final answer were written
    #[error("both an action and a final answer were given")]
    ActionAndFinalAnswer,
}

/// Parses one model response.
///
/// Anything after a hallucinated `Observation:` is ignored, since the real
/// observation comes from running the tool.
pub fn parse(text: &str) -> Result<AgentStep, ParseError> {
    let text = text.find(OBSERVATION).map_or(text, |idx| &text[..idx]);
    let final_idx = text.find(FINAL_ANSWER);
    let action = ACTION_REGEX.captures(text);

    match (action, final_idx) {
        (Some(_), Some(_)) => Err(ParseError::ActionAndFinalAnswer),
        (Some(caps), None) => {
            let start = caps.get(0).map_or(0, |m| m.start());
            let tool = caps.get(1).map_or("", |m| m.as_str());
            let input = caps.get(2).map_or("", |m| m.as_str());
            Ok(AgentStep::Action {
                thought: thought(&text[..start]),
                tool: tool.lines().next().unwrap_or_default().trim().trim_matches('*').trim().to_string(),
                input: input.trim().to_string(),
            })
        }
        (None, Some(idx)) => Ok(AgentStep::Finish {
            thought: thought(&text[..idx]),
            output: text[idx + FINAL_ANSWER.len()..].trim().to_string(),
        }),
        (None, None) if ACTION_LINE_REGEX.is_match(text) => Err(ParseError::MissingActionInput),
        (None, None) => Err(ParseError::MissingAction),
    }
}

fn thought(prefix: &str) -> String {
    let prefix = prefix.trim();
    prefix.strip_prefix("Thought:").unwrap_or(prefix).trim().to_string()
}

/// Removes a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    CODE_FENCE_REGEX
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str())
}

/// Finds the first JSON object in free-form model output.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let text = strip_code_fences(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}
