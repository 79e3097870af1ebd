//! Crew orchestration for Ensemble.
//!
//! Agents (a role, goal and backstory bound to a model) work through tasks
//! one at a time. Each task's output is passed on as context to the tasks
//! after it, optionally written to a file, and collected into a
//! [`CrewOutput`].

/// Logs at `info` when `$verbose` is set and at `debug` otherwise.
macro_rules! log_step {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

pub mod agent;
pub mod config;
pub mod crew;
pub mod error;
pub mod parser;
pub mod prompts;
pub mod task;
pub mod tools;

pub use agent::{Agent, AgentExecution, DEFAULT_MAX_ITER};
pub use config::{BUILTIN_CREW_TOML, BuildOptions, CrewDefinition};
pub use crew::{CONTEXT_SEPARATOR, Crew, CrewOutput};
pub use error::{CrewConfigError, OrchestrationError, Result};
pub use task::{Task, TaskOutput};
pub use tools::{
    SerperSearchTool, Tool, ToolArguments, ToolHandler, ToolParameters, ToolResult,
    delegation_tools,
};
