//! Run command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use ensemble_orchestrator::{BuildOptions, CrewOutput};

use super::load_definition;

/// Options for the run command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub crew_file: Option<PathBuf>,
    pub mock: bool,
    pub output_dir: Option<PathBuf>,
    pub json: bool,
}

/// Execute the run command.
///
/// Loads the crew, kicks it off, and prints the final output (or the whole
/// crew output as JSON).
pub async fn execute(options: RunOptions) -> Result<()> {
    let definition = load_definition(options.crew_file.as_deref())?;

    let build_options = BuildOptions { mock_models: options.mock, output_dir: options.output_dir };
    let crew = definition
        .build(&build_options)
        .with_context(|| format!("Failed to assemble crew '{}'", definition.name()))?;

    if !options.json {
        println!("{} {}", "Running crew".bold().cyan(), definition.name().bold());
        if options.mock {
            println!("  {}", "Using mock models".yellow());
        }
        println!();
    }

    let output = crew.kickoff().await.with_context(|| format!("Crew '{}' failed", definition.name()))?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_summary(&output);
    }

    Ok(())
}

fn print_summary(output: &CrewOutput) {
    for (index, task) in output.tasks_output.iter().enumerate() {
        let label = task.name.clone().unwrap_or_else(|| format!("#{}", index + 1));
        println!(
            "{} Task {} by {} ({} tokens)",
            "✓".green(),
            label.cyan(),
            task.agent_role.bold(),
            task.usage.total_tokens
        );
        if let Some(ref path) = task.output_file {
            println!("    {} {}", "written to".dimmed(), path.display());
        }
    }

    println!();
    println!(
        "{} prompt {}, completion {}, total {}",
        "Token usage:".bold(),
        output.token_usage.prompt_tokens,
        output.token_usage.completion_tokens,
        output.token_usage.total_tokens
    );
    println!();
    println!("{}", "Final output:".bold());
    println!("{}", output);
}
