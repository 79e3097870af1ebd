//! Crews: agents and tasks run in sequence.

use ensemble_abstraction::ModelUsage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::agent::Agent;
use crate::error::{OrchestrationError, Result};
use crate::task::{Task, TaskOutput};
use crate::tools::delegation_tools;

/// Separator placed between earlier task outputs in a task's context.
pub const CONTEXT_SEPARATOR: &str = "\n\n----------\n\n";

/// Ordered agents and tasks, executed one task at a time.
#[derive(Debug, Clone)]
pub struct Crew {
    agents: Vec<Arc<Agent>>,
    tasks: Vec<Task>,
    verbose: bool,
}

/// The result of a crew run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewOutput {
    /// Output of the last task
    pub raw: String,
    /// Output of every task, in execution order
    pub tasks_output: Vec<TaskOutput>,
    /// Tokens used across all tasks
    pub token_usage: ModelUsage,
}

impl std::fmt::Display for CrewOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Crew {
    pub fn new(agents: Vec<Arc<Agent>>, tasks: Vec<Task>) -> Self {
        Self { agents, tasks, verbose: false }
    }

    /// Logs task progress at `info` instead of `debug`.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn agents(&self) -> &[Arc<Agent>] {
        &self.agents
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Checks that agents and tasks fit together.
    ///
    /// # Errors
    /// Returns `InvalidCrew` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(invalid("a crew needs at least one agent"));
        }
        if self.tasks.is_empty() {
            return Err(invalid("a crew needs at least one task"));
        }

        let mut roles = HashSet::new();
        for agent in &self.agents {
            if agent.role().trim().is_empty() {
                return Err(invalid("agent role must not be empty"));
            }
            if !roles.insert(agent.role().to_lowercase()) {
                return Err(invalid(format!("duplicate agent role '{}'", agent.role())));
            }
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for (index, task) in self.tasks.iter().enumerate() {
            let label = task_label(task, index);
            if task.description().trim().is_empty() {
                return Err(invalid(format!("{} has an empty description", label)));
            }
            if !self.agents.iter().any(|a| Arc::ptr_eq(a, task.agent())) {
                return Err(invalid(format!(
                    "{} is assigned to '{}', who is not in the crew",
                    label,
                    task.agent().role()
                )));
            }
            for name in task.context().unwrap_or_default() {
                if !earlier.contains(name.as_str()) {
                    return Err(invalid(format!(
                        "{} uses '{}' as context, which is not an earlier task",
                        label, name
                    )));
                }
            }
            if let Some(name) = task.name() {
                if !earlier.insert(name) {
                    return Err(invalid(format!("duplicate task name '{}'", name)));
                }
            }
        }

        Ok(())
    }

    /// Runs every task in order and returns their outputs.
    ///
    /// # Errors
    /// Stops at the first failing task. Output files of tasks that already
    /// finished are kept.
    pub async fn kickoff(&self) -> Result<CrewOutput> {
        self.validate()?;

        let started = Instant::now();
        let mut outputs: Vec<TaskOutput> = Vec::with_capacity(self.tasks.len());
        let mut token_usage = ModelUsage::default();

        log_step!(self.verbose, agents = self.agents.len(), tasks = self.tasks.len(), "Crew kickoff");

        for (index, task) in self.tasks.iter().enumerate() {
            let context = Self::context_for(task, &outputs);
            let extra_tools = if task.agent().allow_delegation() {
                delegation_tools(&self.coworkers_of(task.agent()))
            } else {
                Vec::new()
            };

            log_step!(
                self.verbose,
                task = %task_label(task, index),
                agent = %task.agent().role(),
                has_context = context.is_some(),
                "Starting task"
            );

            let output = task.execute(context.as_deref(), &extra_tools).await.inspect_err(|e| {
                tracing::error!(task = %task_label(task, index), error = %e, "Task failed");
            })?;

            log_step!(
                self.verbose,
                task = %task_label(task, index),
                agent = %output.agent_role,
                total_tokens = output.usage.total_tokens,
                "Task completed"
            );

            token_usage.accumulate(&output.usage);
            outputs.push(output);
        }

        let raw = outputs.last().map(|o| o.raw.clone()).unwrap_or_default();
        tracing::info!(
            tasks = outputs.len(),
            total_tokens = token_usage.total_tokens,
            elapsed_ms = started.elapsed().as_millis(),
            "Crew finished"
        );

        Ok(CrewOutput { raw, tasks_output: outputs, token_usage })
    }

    /// Context for `task` given the outputs of the tasks before it.
    fn context_for(task: &Task, earlier: &[TaskOutput]) -> Option<String> {
        let selected: Vec<&str> = match task.context() {
            Some(names) => earlier
                .iter()
                .filter(|o| o.name.as_ref().is_some_and(|n| names.contains(n)))
                .map(|o| o.raw.as_str())
                .collect(),
            None => earlier.iter().map(|o| o.raw.as_str()).collect(),
        };

        if selected.is_empty() { None } else { Some(selected.join(CONTEXT_SEPARATOR)) }
    }

    fn coworkers_of(&self, agent: &Arc<Agent>) -> Vec<Arc<Agent>> {
        self.agents.iter().filter(|a| !Arc::ptr_eq(a, agent)).cloned().collect()
    }
}

fn invalid(message: impl Into<String>) -> OrchestrationError {
    OrchestrationError::InvalidCrew(message.into())
}

fn task_label(task: &Task, index: usize) -> String {
    task.name().map_or_else(|| format!("task #{}", index + 1), |name| format!("task '{}'", name))
}
