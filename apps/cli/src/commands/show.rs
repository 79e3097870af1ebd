//! Show command implementation.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use ensemble_orchestrator::config::ToolDefinition;

use super::load_definition;

/// Execute the show command.
///
/// Validates the crew and prints its models, tools, agents and tasks. No
/// model is called and no credential is needed.
pub fn execute(crew_file: Option<&Path>) -> Result<()> {
    let definition = load_definition(crew_file)?;

    println!("{} {}", "Crew".bold().cyan(), definition.name().bold());
    match crew_file {
        Some(path) => println!("  Source: {}", path.display()),
        None => println!("  Source: {}", "built-in".dimmed()),
    }
    println!();

    println!("{}", "Models:".bold());
    for (id, model) in &definition.models {
        println!(
            "  {} {} ({}, {} decoding, max new tokens {})",
            id.cyan(),
            model.model_id,
            model.provider,
            or_default(model.parameters.decoding_method),
            or_default(model.parameters.max_new_tokens)
        );
    }
    println!();

    if !definition.tools.is_empty() {
        println!("{}", "Tools:".bold());
        for (id, tool) in &definition.tools {
            match tool {
                ToolDefinition::Serper { api_key_env, .. } => println!(
                    "  {} Serper web search (key from {})",
                    id.cyan(),
                    api_key_env.as_deref().unwrap_or("SERPER_API_KEY")
                ),
            }
        }
        println!();
    }

    println!("{}", "Agents:".bold());
    for agent in &definition.agents {
        println!("  {} {}", agent.id.cyan(), agent.role.bold());
        println!("    Goal: {}", agent.goal);
        print!("    LLM: {}", agent.llm);
        if let Some(ref fc) = agent.function_calling_llm {
            print!(" (function calling: {})", fc);
        }
        println!();
        if !agent.tools.is_empty() {
            println!("    Tools: {}", agent.tools.join(", "));
        }
        println!("    Delegation: {}", if agent.allow_delegation { "yes".green() } else { "no".dimmed() });
    }
    println!();

    println!("{}", "Tasks:".bold());
    for (index, task) in definition.tasks.iter().enumerate() {
        let label = task.name.clone().unwrap_or_else(|| format!("#{}", index + 1));
        println!("  {}. {} ({})", index + 1, label.cyan(), task.agent);
        println!("    {}", task.description);
        if let Some(ref file) = task.output_file {
            println!("    Output file: {}", file.display());
        }
        if let Some(ref context) = task.context {
            println!("    Context: {}", context.join(", "));
        }
    }

    Ok(())
}

fn or_default<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "default".to_string(), |v| v.to_string())
}
