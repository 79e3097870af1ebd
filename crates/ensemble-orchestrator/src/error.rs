// Error types for crew orchestration

use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Invalid tool arguments
    #[error("Invalid tool arguments for '{tool}': {reason}")]
    InvalidToolArguments {
        /// Tool name
        tool: String,
        /// Reason why arguments are invalid
        reason: String,
    },

    /// Tool execution failed
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// Model error
    #[error("Model error: {0}")]
    Model(#[from] ensemble_abstraction::ModelError),

    /// The crew's agents and tasks do not fit together
    #[error("Invalid crew: {0}")]
    InvalidCrew(String),

    /// Writing a task's output file failed
    #[error("Failed to write output file {path}: {source}")]
    OutputFile {
        /// Destination that could not be written
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}

/// Errors raised while loading or building a crew definition file.
#[derive(Debug, Error)]
pub enum CrewConfigError {
    /// IO error reading the file
    #[error("IO error reading crew file {path}: {source}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The definition parsed but is inconsistent
    #[error("Invalid crew definition: {0}")]
    Invalid(String),

    /// A model could not be created
    #[error("Failed to create model '{id}': {source}")]
    Model {
        /// Model id in the definition
        id: String,
        /// Underlying model error
        #[source]
        source: ensemble_abstraction::ModelError,
    },

    /// A credential environment variable is missing
    #[error("Environment variable {var} is not set (needed by {needed_by})")]
    MissingCredential {
        /// Variable name
        var: String,
        /// Model or tool id that needs it
        needed_by: String,
    },
}
