// Prompt text for the agent loop

use std::fmt::Write;

use crate::tools::Tool;

/// Stop sequence that ends every agent turn before the observation.
pub const OBSERVATION_STOP: &str = "\nObservation:";

/// Sent after the iteration limit to get a last answer out of the agent.
pub const FORCE_FINAL_ANSWER: &str = "You have run out of steps. Stop using tools now \
and return your best complete answer to the task, using the exact format:\n\n\
Thought: I now can give a great answer\nFinal Answer: your complete final answer";

/// Observation used when the same tool is called twice in a row with the same input.
pub const REPEATED_INPUT: &str = "I tried reusing the same input, I must stop using \
this action input. I'll try something else instead.";

const FINAL_FORMAT: &str = "Thought: I now can give a great answer\n\
Final Answer: your complete final answer, exactly as described in the expected output";

/// System prompt describing who the agent is and how it must answer.
pub fn system_prompt(role: &str, goal: &str, backstory: &str, tools: &[Tool]) -> String {
    let mut prompt = format!("You are {}. {}\nYour personal goal is: {}\n\n", role, backstory, goal);

    if tools.is_empty() {
        let _ = write!(
            prompt,
            "To give your best complete final answer to the task use the exact following format:\n\n{}\n\n\
             You MUST use this format.",
            FINAL_FORMAT
        );
        return prompt;
    }

    prompt.push_str(
        "You ONLY have access to the following tools, and should NEVER make up tools that are not listed here:\n\n",
    );
    for tool in tools {
        let _ = write!(
            prompt,
            "Tool Name: {}\nTool Arguments: {}\nTool Description: {}\n\n",
            tool.name,
            tool.parameters.describe(),
            tool.description
        );
    }

    let names = tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ");
    let _ = write!(
        prompt,
        "Use the following format:\n\n\
         Thought: you should always think about what to do\n\
         Action: the action to take, only one name of [{}], just the name, exactly as it's written\n\
         Action Input: the input to the action, a JSON object using \" to wrap keys and values\n\
         Observation: the result of the action\n\n\
         Repeat Thought/Action/Action Input/Observation as needed. Once you have all the information you need:\n\n{}",
        names, FINAL_FORMAT
    );
    prompt
}

/// User prompt for one task.
pub fn task_prompt(description: &str, expected_output: &str, context: Option<&str>) -> String {
    let mut prompt = format!(
        "Current Task: {}\n\n\
         This is the expected criteria for your final answer: {}\n\
         You MUST return the actual complete content as the final answer, not a summary.",
        description, expected_output
    );

    if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
        let _ = write!(prompt, "\n\nThis is the context you're working with:\n{}", context);
    }

    prompt.push_str("\n\nBegin! Give your best Final Answer.");
    prompt
}

/// Observation explaining what was wrong with the last response.
pub fn format_error(problem: &str) -> String {
    format!(
        "Invalid format: {}. Either use a tool with 'Action:' and 'Action Input:', \
         or give your answer with the exact format:\n\n{}",
        problem, FINAL_FORMAT
    )
}

/// Observation for a tool name that is not available.
pub fn unknown_tool(name: &str, tools: &[Tool]) -> String {
    let names = tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(", ");
    if names.is_empty() {
        format!("Tool '{}' does not exist. You have no tools; give your Final Answer.", name)
    } else {
        format!("Tool '{}' does not exist. The only available tools are: {}", name, names)
    }
}

/// Prompt asking the function-calling model to turn raw input into arguments.
pub fn function_calling_prompt(tool: &Tool, raw_input: &str) -> String {
    format!(
        "Convert the following tool input into the JSON arguments for the tool.\n\n\
         Tool Name: {}\nTool Description: {}\nTool Arguments: {}\n\n\
         Raw input:\n{}\n\n\
         Respond with a single JSON object containing only the tool arguments, and nothing else.\nJSON:",
        tool.name,
        tool.description,
        tool.parameters.describe(),
        raw_input
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SerperSearchTool;

    #[test]
    fn test_system_prompt_without_tools() {
        let prompt = system_prompt("Writer", "Write speeches", "You write.", &[]);
        assert!(prompt.starts_with("You are Writer. You write.\nYour personal goal is: Write speeches"));
        assert!(prompt.contains("Final Answer:"));
        assert!(!prompt.contains("Action:"));
    }

    #[test]
    fn test_system_prompt_lists_tools() {
        let tools = vec![SerperSearchTool::new("k".to_string()).into_tool()];
        let prompt = system_prompt("Researcher", "Find research", "Veteran.", &tools);
        assert!(prompt.contains("Tool Name: Search the internet"));
        assert!(prompt.contains("\"search_query\""));
        assert!(prompt.contains("only one name of [Search the internet]"));
    }

    #[test]
    fn test_task_prompt_context() {
        let without = task_prompt("Do it", "A thing", None);
        assert!(without.starts_with("Current Task: Do it"));
        assert!(!without.contains("context"));

        let with = task_prompt("Do it", "A thing", Some("earlier result"));
        assert!(with.contains("This is the context you're working with:\nearlier result"));

        let blank = task_prompt("Do it", "A thing", Some("  "));
        assert!(!blank.contains("context"));
    }

    #[test]
    fn test_unknown_tool_lists_alternatives() {
        let tools = vec![SerperSearchTool::new("k".to_string()).into_tool()];
        assert!(unknown_tool("Calculator", &tools).contains("Search the internet"));
        assert!(unknown_tool("Calculator", &[]).contains("no tools"));
    }
}
