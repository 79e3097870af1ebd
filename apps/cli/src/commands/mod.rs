//! Command implementations for the Ensemble CLI.

pub mod init;
pub mod run;
pub mod show;

use std::path::Path;

use anyhow::Context;
use ensemble_orchestrator::CrewDefinition;

/// Loads `crew_file`, or the built-in crew when none is given.
pub fn load_definition(crew_file: Option<&Path>) -> anyhow::Result<CrewDefinition> {
    match crew_file {
        Some(path) => CrewDefinition::load(path)
            .with_context(|| format!("Failed to load crew file {}", path.display())),
        None => CrewDefinition::builtin().context("Built-in crew definition is invalid"),
    }
}
