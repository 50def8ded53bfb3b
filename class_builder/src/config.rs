//! Builder configuration
//!
//! Read from a JSON file, either given explicitly or named by the
//! `CLASS_BUILDER_CONFIG` environment variable. Missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    CONFIG_ENV_VAR, DEFAULT_MAX_DEPTH, DEFAULT_PATH_SEPARATOR, DEFAULT_SCAN_BATCH_SIZE,
};
use crate::error::{Error, Result};

/// Tunables of a builder tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Separator placed between breadcrumb segments of a node path
    pub path_separator:  String,
    /// Maximum nesting depth when building nodes from initial values and defaults
    pub max_depth:       usize,
    /// Nodes visited by a background scan between cancellation checks
    pub scan_batch_size: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            path_separator:  DEFAULT_PATH_SEPARATOR.to_string(),
            max_depth:       DEFAULT_MAX_DEPTH,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}

impl BuilderConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), ?config, "Loaded builder configuration");
        Ok(config)
    }

    /// Load the file named by `CLASS_BUILDER_CONFIG`, or the defaults when it is unset
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(path.trim())),
            _ => Ok(Self::default()),
        }
    }

    /// Reject values no tree can work with
    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(Error::Configuration("max_depth must be at least 1".to_string()).into());
        }
        if self.scan_batch_size == 0 {
            return Err(
                Error::Configuration("scan_batch_size must be at least 1".to_string()).into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "path_separator": " / " }}"#).unwrap();
        let config = BuilderConfig::load(file.path()).unwrap();
        assert_eq!(config.path_separator, " / ");
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.scan_batch_size, DEFAULT_SCAN_BATCH_SIZE);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "scan_batch_size": 0 }}"#).unwrap();
        let err = BuilderConfig::load(file.path()).unwrap_err();
        assert!(matches!(err.current_context(), Error::Configuration(_)));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BuilderConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err.current_context(), Error::Configuration(_)));
    }
}
