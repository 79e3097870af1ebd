//! CLI configuration file support.
//!
//! Settings are read from the global file (`~/.ensemble/config.toml`) and
//! then the local one (`./.ensemblerc`). Local values override global ones
//! and command line flags override both.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CLI configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Log level used when `--log-level` is not given
    #[serde(default)]
    pub log_level: Option<String>,

    /// Directory relative task output files are written to
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Crew file used when none is given on the command line
    #[serde(default)]
    pub crew_file: Option<PathBuf>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum CliConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type for configuration operations.
pub type CliConfigResult<T> = std::result::Result<T, CliConfigError>;

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> CliConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| CliConfigError::Read { path: path.to_path_buf(), source })?;

        toml::from_str(&content)
            .map_err(|source| CliConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Default global configuration file path, if a home directory is known.
    pub fn default_global_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ensemble").join("config.toml"))
    }

    /// Default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".ensemblerc")
    }

    /// Discover and load the global and local configuration files.
    pub fn discover_and_load() -> CliConfigResult<Self> {
        Self::load_layers(Self::default_global_path().as_deref(), &Self::default_local_path())
    }

    /// Loads `global` then `local`, skipping files that do not exist.
    ///
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_layers(global: Option<&Path>, local: &Path) -> CliConfigResult<Self> {
        let mut config = Self::default();

        for path in global.into_iter().chain(std::iter::once(local)) {
            if path.is_file() {
                config.merge(&Self::load_from_file(path)?);
                tracing::debug!(path = %path.display(), "Loaded CLI configuration");
            }
        }

        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &Self) {
        if let Some(ref log_level) = other.log_level {
            self.log_level = Some(log_level.clone());
        }
        if let Some(ref output_dir) = other.output_dir {
            self.output_dir = Some(output_dir.clone());
        }
        if let Some(ref crew_file) = other.crew_file {
            self.crew_file = Some(crew_file.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        std::fs::write(
            &config_path,
            r#"
log_level = "debug"
output_dir = "out"
crew_file = "crews/keynote.toml"
"#,
        )
        .unwrap();

        let config = CliConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.output_dir, Some(PathBuf::from("out")));
        assert_eq!(config.crew_file, Some(PathBuf::from("crews/keynote.toml")));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = CliConfig::load_from_file(&temp_dir.path().join("nope.toml"));
        assert!(matches!(result, Err(CliConfigError::Read { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "log_level = [").unwrap();

        let err = CliConfig::load_from_file(&config_path).unwrap_err();
        assert!(matches!(err, CliConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = CliConfig {
            log_level: Some("info".to_string()),
            output_dir: Some(PathBuf::from("base")),
            crew_file: None,
        };
        let other = CliConfig { log_level: Some("warn".to_string()), output_dir: None, crew_file: None };

        base.merge(&other);

        assert_eq!(base.log_level.as_deref(), Some("warn"));
        assert_eq!(base.output_dir, Some(PathBuf::from("base")));
        assert_eq!(base.crew_file, None);
    }

    #[test]
    fn test_local_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("config.toml");
        let local = temp_dir.path().join(".ensemblerc");
        std::fs::write(&global, "log_level = \"debug\"\noutput_dir = \"global-out\"\n").unwrap();
        std::fs::write(&local, "output_dir = \"local-out\"\n").unwrap();

        let config = CliConfig::load_layers(Some(&global), &local).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.output_dir, Some(PathBuf::from("local-out")));
    }

    #[test]
    fn test_missing_layers_give_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            CliConfig::load_layers(Some(&temp_dir.path().join("none.toml")), &temp_dir.path().join(".ensemblerc"))
                .unwrap();
        assert_eq!(config, CliConfig::default());
    }
}
