// Tools that let an agent hand work to, or ask questions of, its coworkers

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{Tool, ToolArguments, ToolHandler, ToolParameters, ToolResult};
use crate::agent::Agent;
use crate::error::Result;

/// Name of the tool that hands a task to a coworker.
pub const DELEGATE_WORK_TOOL: &str = "Delegate work to coworker";

/// Name of the tool that asks a coworker a question.
pub const ASK_QUESTION_TOOL: &str = "Ask question to coworker";

const COWORKER_EXPECTED_OUTPUT: &str =
    "Your best answer to your coworker asking you this, accounting for the context shared.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Delegate,
    Ask,
}

impl Request {
    const fn primary_argument(self) -> &'static str {
        match self {
            Self::Delegate => "task",
            Self::Ask => "question",
        }
    }
}

struct CoworkerHandler {
    coworkers: Vec<Arc<Agent>>,
    request: Request,
}

impl CoworkerHandler {
    fn find(&self, role: &str) -> Option<&Arc<Agent>> {
        let role = role.trim().trim_matches('"');
        self.coworkers.iter().find(|agent| agent.role().eq_ignore_ascii_case(role))
    }

    fn roles(&self) -> String {
        self.coworkers.iter().map(|a| format!("- {}", a.role())).collect::<Vec<_>>().join("\n")
    }
}

#[async_trait]
impl ToolHandler for CoworkerHandler {
    async fn execute(&self, args: &ToolArguments) -> Result<ToolResult> {
        let primary = self.request.primary_argument();
        let Some(work) = args.get_string(primary) else {
            return Ok(ToolResult::error(format!("'{}' is required", primary)));
        };
        let coworker_role = args.get_string("coworker").unwrap_or_default();
        let Some(coworker) = self.find(&coworker_role) else {
            return Ok(ToolResult::error(format!(
                "Coworker '{}' not found, it must be one of the following options:\n{}",
                coworker_role,
                self.roles()
            )));
        };
        let context = args.get_string("context");

        info!(coworker = %coworker.role(), request = ?self.request, "Handing work to coworker");

        // Coworkers get no delegation tools of their own.
        let execution = coworker
            .execute_task(&work, COWORKER_EXPECTED_OUTPUT, context.as_deref(), &[])
            .await?;

        Ok(ToolResult::success(execution.output)
            .with_metadata("coworker", coworker.role())
            .with_metadata("prompt_tokens", execution.usage.prompt_tokens.to_string())
            .with_metadata("completion_tokens", execution.usage.completion_tokens.to_string()))
    }
}

fn coworker_tool(coworkers: &[Arc<Agent>], request: Request) -> Tool {
    let roles = coworkers.iter().map(|a| a.role()).collect::<Vec<_>>().join(", ");
    let (name, description, primary_description) = match request {
        Request::Delegate => (
            DELEGATE_WORK_TOOL,
            format!(
                "Delegate a specific task to one of the following coworkers: {}. \
                 The input must include the task, all necessary context, and the coworker's role. \
                 They know nothing about the task, so share absolutely everything you know.",
                roles
            ),
            "The task to delegate",
        ),
        Request::Ask => (
            ASK_QUESTION_TOOL,
            format!(
                "Ask a specific question to one of the following coworkers: {}. \
                 The input must include the question, all necessary context, and the coworker's role. \
                 They know nothing about the question, so share absolutely everything you know.",
                roles
            ),
            "The question to ask",
        ),
    };

    let parameters = ToolParameters::new()
        .add_property(request.primary_argument(), "string", primary_description, true)
        .add_property("context", "string", "Everything the coworker needs to know", true)
        .add_property("coworker", "string", "Role of the coworker", true);

    Tool::new(
        name,
        description,
        parameters,
        Arc::new(CoworkerHandler { coworkers: coworkers.to_vec(), request }),
    )
}

/// Builds the delegation tools for an agent whose coworkers are `coworkers`.
///
/// Returns no tools when there is nobody to delegate to.
pub fn delegation_tools(coworkers: &[Arc<Agent>]) -> Vec<Tool> {
    if coworkers.is_empty() {
        return Vec::new();
    }
    vec![coworker_tool(coworkers, Request::Delegate), coworker_tool(coworkers, Request::Ask)]
}
