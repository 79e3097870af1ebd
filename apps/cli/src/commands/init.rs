//! Init command implementation.
//!
//! Writes the built-in crew definition to disk as a starting point.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use ensemble_orchestrator::BUILTIN_CREW_TOML;
use std::path::Path;

/// Execute the init command.
pub async fn execute(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    tokio::fs::write(path, BUILTIN_CREW_TOML)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} Crew definition written to {}", "✓".green(), path.display().to_string().cyan());
    println!();
    println!("  {}", "Set credentials before running it:".dimmed());
    println!("    export WATSONX_APIKEY=...");
    println!("    export SERPER_API_KEY=...");
    println!("  {}", "Then run:".dimmed());
    println!("    ensemble run {}", path.display());

    Ok(())
}
