//! Tasks: a unit of work bound to one agent.

use chrono::{DateTime, Utc};
use ensemble_abstraction::ModelUsage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{OrchestrationError, Result};
use crate::tools::Tool;

/// A unit of work for one agent.
#[derive(Debug, Clone)]
pub struct Task {
    name: Option<String>,
    description: String,
    expected_output: String,
    agent: Arc<Agent>,
    output_file: Option<PathBuf>,
    context: Option<Vec<String>>,
}

/// The result of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Task name, if it has one
    pub name: Option<String>,
    /// What the agent was asked to do
    pub description: String,
    /// What a good answer looks like
    pub expected_output: String,
    /// Role of the agent that did the work
    pub agent_role: String,
    /// The agent's final answer
    pub raw: String,
    /// Tokens used while working on the task
    pub usage: ModelUsage,
    /// Where the answer was written, if anywhere
    pub output_file: Option<PathBuf>,
    /// When the task finished
    pub completed_at: DateTime<Utc>,
}

impl Task {
    /// Creates a task for `agent`.
    pub fn new(description: impl Into<String>, expected_output: impl Into<String>, agent: Arc<Agent>) -> Self {
        Self {
            name: None,
            description: description.into(),
            expected_output: expected_output.into(),
            agent,
            output_file: None,
            context: None,
        }
    }

    /// Names the task so later tasks can use it as context.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Writes the task's answer to `path` (overwriting it).
    #[must_use]
    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Uses only the named earlier tasks as context instead of all of them.
    #[must_use]
    pub fn with_context<I, S>(mut self, task_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = Some(task_names.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn expected_output(&self) -> &str {
        &self.expected_output
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub fn output_file(&self) -> Option<&Path> {
        self.output_file.as_deref()
    }

    pub fn context(&self) -> Option<&[String]> {
        self.context.as_deref()
    }

    /// Runs the task's agent and writes the output file, if any.
    ///
    /// # Errors
    /// Returns model errors from the agent and IO errors from writing the file.
    pub async fn execute(&self, context: Option<&str>, extra_tools: &[Tool]) -> Result<TaskOutput> {
        let execution = self
            .agent
            .execute_task(&self.description, &self.expected_output, context, extra_tools)
            .await?;

        if let Some(path) = &self.output_file {
            write_output(path, &execution.output).await?;
        }

        Ok(TaskOutput {
            name: self.name.clone(),
            description: self.description.clone(),
            expected_output: self.expected_output.clone(),
            agent_role: self.agent.role().to_string(),
            raw: execution.output,
            usage: execution.usage,
            output_file: self.output_file.clone(),
            completed_at: Utc::now(),
        })
    }
}

async fn write_output(path: &Path, content: &str) -> Result<()> {
    let io_error = |source| OrchestrationError::OutputFile { path: path.to_path_buf(), source };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    tokio::fs::write(path, content).await.map_err(io_error)?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote task output");
    Ok(())
}
