//! Agents and their reasoning loop.
//!
//! An agent is a persona (role, goal, backstory) bound to a model. Given a
//! task it runs a Thought / Action / Observation loop: each model turn either
//! names a tool to run or gives the final answer.

use ensemble_abstraction::{ChatMessage, Model, ModelParameters, ModelUsage};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{OrchestrationError, Result};
use crate::parser::{self, AgentStep};
use crate::prompts;
use crate::tools::{Tool, ToolArguments};

/// Iterations an agent gets before it is asked for a final answer.
pub const DEFAULT_MAX_ITER: u32 = 20;

/// An agent persona bound to a model.
#[derive(Clone)]
pub struct Agent {
    role: String,
    goal: String,
    backstory: String,
    llm: Arc<dyn Model + Send + Sync>,
    function_calling_llm: Option<Arc<dyn Model + Send + Sync>>,
    tools: Vec<Tool>,
    allow_delegation: bool,
    verbose: bool,
    max_iter: u32,
}

/// What an agent produced for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExecution {
    /// The final answer
    pub output: String,
    /// Tokens used by every model call made for this task
    pub usage: ModelUsage,
    /// Model turns taken, not counting the forced answer
    pub iterations: u32,
    /// Whether the iteration limit was hit
    pub forced: bool,
}

impl Agent {
    /// Creates an agent with no tools, delegation off and the default iteration limit.
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
        llm: Arc<dyn Model + Send + Sync>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            llm,
            function_calling_llm: None,
            tools: Vec::new(),
            allow_delegation: false,
            verbose: false,
            max_iter: DEFAULT_MAX_ITER,
        }
    }

    /// Sets a second model used only to structure tool arguments.
    #[must_use]
    pub fn with_function_calling_llm(mut self, llm: Arc<dyn Model + Send + Sync>) -> Self {
        self.function_calling_llm = Some(llm);
        self
    }

    /// Adds a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Adds several tools.
    #[must_use]
    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Tool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Lets the agent hand work to its crew's other agents.
    #[must_use]
    pub fn with_allow_delegation(mut self, allow: bool) -> Self {
        self.allow_delegation = allow;
        self
    }

    /// Logs every step at `info` instead of `debug`.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the iteration limit (at least 1).
    #[must_use]
    pub fn with_max_iter(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn backstory(&self) -> &str {
        &self.backstory
    }

    pub fn llm(&self) -> &Arc<dyn Model + Send + Sync> {
        &self.llm
    }

    pub fn function_calling_llm(&self) -> Option<&Arc<dyn Model + Send + Sync>> {
        self.function_calling_llm.as_ref()
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn allow_delegation(&self) -> bool {
        self.allow_delegation
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn max_iter(&self) -> u32 {
        self.max_iter
    }

    /// Works on a task until the model gives a final answer.
    ///
    /// `extra_tools` are offered on top of the agent's own tools for this
    /// task only (the crew uses this for delegation).
    ///
    /// # Errors
    /// Model failures are returned as `OrchestrationError::Model`. Tool
    /// failures and badly formatted output are fed back to the model instead.
    pub async fn execute_task(
        &self,
        description: &str,
        expected_output: &str,
        context: Option<&str>,
        extra_tools: &[Tool],
    ) -> Result<AgentExecution> {
        let tools: Vec<Tool> = self.tools.iter().chain(extra_tools).cloned().collect();
        let mut messages = vec![
            ChatMessage::system(prompts::system_prompt(&self.role, &self.goal, &self.backstory, &tools)),
            ChatMessage::user(prompts::task_prompt(description, expected_output, context)),
        ];
        let parameters = ModelParameters {
            stop_sequences: Some(vec![prompts::OBSERVATION_STOP.to_string()]),
            ..Default::default()
        };

        let mut usage = ModelUsage::default();
        let mut last_action: Option<(String, String)> = None;

        log_step!(self.verbose, agent = %self.role, task = %description, tools = tools.len(), "Agent started task");

        for iteration in 1..=self.max_iter {
            let response = self.llm.generate_chat_completion(&messages, Some(parameters.clone())).await?;
            if let Some(u) = &response.usage {
                usage.accumulate(u);
            }

            let observation = match parser::parse(&response.content) {
                Ok(AgentStep::Finish { thought, output }) => {
                    log_step!(self.verbose, agent = %self.role, iteration, thought = %thought, "Agent finished task");
                    return Ok(AgentExecution { output, usage, iterations: iteration, forced: false });
                }
                Ok(AgentStep::Action { thought, tool, input }) => {
                    log_step!(
                        self.verbose,
                        agent = %self.role,
                        iteration,
                        thought = %thought,
                        tool = %tool,
                        input = %input,
                        "Agent chose action"
                    );
                    let key = (tool.to_lowercase(), input.clone());
                    if last_action.as_ref() == Some(&key) {
                        prompts::REPEATED_INPUT.to_string()
                    } else {
                        last_action = Some(key);
                        self.run_tool(&tools, &tool, &input, &mut usage).await?
                    }
                }
                Err(e) => {
                    tracing::warn!(agent = %self.role, iteration, error = %e, "Agent output did not follow the format");
                    prompts::format_error(&e.to_string())
                }
            };

            log_step!(self.verbose, agent = %self.role, iteration, observation = %observation, "Observation");
            messages.push(ChatMessage::assistant(response.content.trim_end()));
            messages.push(ChatMessage::user(format!("Observation: {}", observation)));
        }

        tracing::warn!(agent = %self.role, max_iter = self.max_iter, "Iteration limit reached, forcing final answer");
        messages.push(ChatMessage::user(prompts::FORCE_FINAL_ANSWER));
        let response = self.llm.generate_chat_completion(&messages, Some(parameters)).await?;
        if let Some(u) = &response.usage {
            usage.accumulate(u);
        }

        let output = match parser::parse(&response.content) {
            Ok(AgentStep::Finish { output, .. }) => output,
            _ => response.content.trim().to_string(),
        };
        Ok(AgentExecution { output, usage, iterations: self.max_iter, forced: true })
    }

    /// Runs one tool call and returns the observation text.
    async fn run_tool(
        &self,
        tools: &[Tool],
        name: &str,
        raw_input: &str,
        usage: &mut ModelUsage,
    ) -> Result<String> {
        let Some(tool) = tools.iter().find(|t| t.matches(name)) else {
            return Ok(prompts::unknown_tool(name, tools));
        };

        let args = match self.resolve_arguments(tool, raw_input, usage).await? {
            Ok(args) => args,
            Err(reason) => {
                let err = OrchestrationError::InvalidToolArguments { tool: tool.name.clone(), reason };
                return Ok(err.to_string());
            }
        };

        match tool.execute(&args).await {
            Ok(result) => {
                usage.accumulate(&reported_usage(&result.metadata));
                if result.success {
                    Ok(result.output)
                } else {
                    Ok(format!("Error: {}", result.output))
                }
            }
            Err(OrchestrationError::Model(e)) => Err(OrchestrationError::Model(e)),
            Err(e) => {
                tracing::warn!(tool = %tool.name, error = %e, "Tool returned an error");
                Ok(OrchestrationError::ToolExecutionFailed(e.to_string()).to_string())
            }
        }
    }

    /// Turns raw `Action Input` text into arguments that satisfy the tool schema.
    ///
    /// The outer error is a model failure; the inner one is a message for the agent.
    async fn resolve_arguments(
        &self,
        tool: &Tool,
        raw_input: &str,
        usage: &mut ModelUsage,
    ) -> Result<std::result::Result<ToolArguments, String>> {
        let mut structured = None;
        if let Some(fc_llm) = &self.function_calling_llm {
            let response = fc_llm
                .generate_text(&prompts::function_calling_prompt(tool, raw_input), None)
                .await?;
            if let Some(u) = &response.usage {
                usage.accumulate(u);
            }
            structured = parser::extract_json_object(&response.content);
            if structured.is_none() {
                tracing::debug!(
                    tool = %tool.name,
                    model = fc_llm.model_id(),
                    "Function calling model gave no JSON, parsing input directly"
                );
            }
        }

        let value = match structured {
            Some(value) => value,
            None => match parse_input(tool, raw_input) {
                Ok(value) => value,
                Err(reason) => return Ok(Err(reason)),
            },
        };

        let args = ToolArguments::new(value);
        let missing = args.missing(&tool.parameters.required);
        if missing.is_empty() {
            Ok(Ok(args))
        } else {
            Ok(Err(format!("missing required argument(s): {}", missing.join(", "))))
        }
    }
}

/// Parses `Action Input` text without help from a model.
///
/// JSON objects are taken as-is. A bare value is accepted when the tool has
/// exactly one required parameter.
fn parse_input(tool: &Tool, raw_input: &str) -> std::result::Result<Value, String> {
    let input = parser::strip_code_fences(raw_input);
    if input.is_empty() {
        return if tool.parameters.required.is_empty() {
            Ok(Value::Object(serde_json::Map::new()))
        } else {
            Err("Action Input is empty".to_string())
        };
    }

    let parsed = serde_json::from_str::<Value>(input).ok().or_else(|| parser::extract_json_object(input));
    match (parsed, tool.parameters.sole_required()) {
        (Some(value @ Value::Object(_)), _) => Ok(value),
        (Some(Value::String(s)), Some(only)) => Ok(single_argument(only, s)),
        (Some(Value::Number(_) | Value::Bool(_)), Some(only)) => Ok(single_argument(only, input.to_string())),
        (None, Some(only)) => Ok(single_argument(only, input.trim_matches('"').to_string())),
        _ => Err("Action Input must be a JSON object, e.g. {\"argument\": \"value\"}".to_string()),
    }
}

fn single_argument(name: &str, value: String) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(name.to_string(), Value::String(value));
    Value::Object(map)
}

/// Usage a tool reports in its metadata (delegation runs a whole agent).
fn reported_usage(metadata: &std::collections::HashMap<String, String>) -> ModelUsage {
    let count = |key: &str| metadata.get(key).and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    ModelUsage::new(count("prompt_tokens"), count("completion_tokens"))
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("goal", &self.goal)
            .field("llm", &self.llm.model_id())
            .field("function_calling_llm", &self.function_calling_llm.as_ref().map(|m| m.model_id()))
            .field("tools", &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("allow_delegation", &self.allow_delegation)
            .field("verbose", &self.verbose)
            .field("max_iter", &self.max_iter)
            .finish_non_exhaustive()
    }
}
