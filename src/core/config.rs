//! Engine configuration
//!
//! ```toml
//! read_mode = "lenient"
//!
//! [rebuild]
//! mode = "safe"
//! verify_output = true
//!
//! [batch]
//! create_backups = true
//! stop_on_error = false
//! parallelism = 4
//! backup_suffix = "backup"
//! ```
//!
//! Every key is optional.

use crate::batch::BatchOptions;
use crate::codec::ReadMode;
use crate::error::Result;
use crate::rebuild::{RebuildEngine, RebuildMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebuildSettings {
    pub mode: RebuildMode,
    pub verify_output: bool,
}

impl Default for RebuildSettings {
    fn default() -> Self {
        RebuildSettings {
            mode: RebuildMode::Fast,
            verify_output: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub create_backups: bool,
    pub stop_on_error: bool,
    pub parallelism: usize,
    pub backup_suffix: String,
}

impl Default for BatchSettings {
    fn default() -> Self {
        let options = BatchOptions::default();
        BatchSettings {
            create_backups: options.create_backups,
            stop_on_error: options.stop_on_error,
            parallelism: options.parallelism,
            backup_suffix: options.backup_suffix,
        }
    }
}

/// Engine settings, usually read from a TOML file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How directories are parsed on open
    pub read_mode: ReadMode,
    pub rebuild: RebuildSettings,
    pub batch: BatchSettings,
}

impl EngineConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading engine config from {:?}", path.as_ref());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Engine for single-archive rebuilds
    pub fn rebuild_engine(&self) -> RebuildEngine {
        RebuildEngine::new(self.rebuild.mode).verify_output(self.rebuild.verify_output)
    }

    /// Options for [`crate::batch::rebuild_all`]
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            create_backups: self.batch.create_backups,
            stop_on_error: self.batch.stop_on_error,
            parallelism: self.batch.parallelism,
            backup_suffix: self.batch.backup_suffix.clone(),
            read_mode: self.read_mode,
            verify_output: self.rebuild.verify_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImgError;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.read_mode, ReadMode::Lenient);
        assert_eq!(config.rebuild.mode, RebuildMode::Fast);
        assert!(config.batch.create_backups);
        assert_eq!(config.batch.parallelism, 1);
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            read_mode = "strict"

            [rebuild]
            mode = "safe"

            [batch]
            parallelism = 4
            backup_suffix = "bak"
            "#,
        )
        .unwrap();

        assert_eq!(config.read_mode, ReadMode::Strict);
        assert_eq!(config.rebuild_engine().mode(), RebuildMode::Safe);
        assert!(config.rebuild.verify_output);

        let options = config.batch_options();
        assert_eq!(options.parallelism, 4);
        assert_eq!(options.backup_suffix, "bak");
        assert_eq!(options.read_mode, ReadMode::Strict);
        assert!(!options.stop_on_error);
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let result = EngineConfig::from_toml_str("[rebuild]\nmode = \"turbo\"");
        assert!(matches!(result, Err(ImgError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[batch]\nstop_on_error = true\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.batch.stop_on_error);
    }
}
