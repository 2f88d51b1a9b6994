//! Fact base configuration
//!
//! Settings are read from a TOML file with per-field defaults, then environment
//! overrides are applied on top:
//!
//! | variable | setting |
//! |---|---|
//! | `DOVETAIL_ALLOW_DUPLICATES` | `allow_duplicates` |
//! | `DOVETAIL_HASH_TABLE_FLOOR` | `hash_table_floor` |
//! | `DOVETAIL_GC_THRESHOLD` | `gc_threshold` |
//! | `DOVETAIL_INCREMENTAL_RESET` | `incremental_reset` |
//! | `DOVETAIL_LOG_LEVEL` | `logging.level` |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Settings for the whole fact base
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct FactBaseConfig {
    /// Allow several facts with identical content
    #[serde(default)]
    pub allow_duplicates: bool,
    /// Bucket count the hash index starts at and shrinks back to when empty
    #[serde(default = "default_hash_table_floor")]
    pub hash_table_floor: usize,
    /// Retracted facts pending before a garbage collection runs; 0 disables it
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: usize,
    /// Replay existing facts through newly added patterns right away
    #[serde(default = "default_true")]
    pub incremental_reset: bool,
    /// Constant tests on one field at which siblings are grouped into a selector
    #[serde(default = "default_selector_threshold")]
    pub selector_threshold: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for `init_tracing`
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

impl Default for FactBaseConfig {
    fn default() -> Self {
        Self {
            allow_duplicates: false,
            hash_table_floor: default_hash_table_floor(),
            gc_threshold: default_gc_threshold(),
            incremental_reset: true,
            selector_threshold: default_selector_threshold(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FactBaseConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from an optional file, apply environment overrides and validate.
    ///
    /// A missing file falls back to the defaults with a warning.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                warn!(path = %path.display(), "Configuration file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        let config = config.with_env_overrides()?;
        config.validate()?;
        info!(
            allow_duplicates = config.allow_duplicates,
            hash_table_floor = config.hash_table_floor,
            gc_threshold = config.gc_threshold,
            incremental_reset = config.incremental_reset,
            "Loaded fact base configuration"
        );
        Ok(config)
    }

    /// Apply `DOVETAIL_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed by environment variable name
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup("DOVETAIL_ALLOW_DUPLICATES") {
            self.allow_duplicates = parse_setting("allow_duplicates", &value)?;
        }
        if let Some(value) = lookup("DOVETAIL_HASH_TABLE_FLOOR") {
            self.hash_table_floor = parse_setting("hash_table_floor", &value)?;
        }
        if let Some(value) = lookup("DOVETAIL_GC_THRESHOLD") {
            self.gc_threshold = parse_setting("gc_threshold", &value)?;
        }
        if let Some(value) = lookup("DOVETAIL_INCREMENTAL_RESET") {
            self.incremental_reset = parse_setting("incremental_reset", &value)?;
        }
        if let Some(value) = lookup("DOVETAIL_LOG_LEVEL") {
            self.logging.level = value;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_table_floor == 0 {
            return Err(ConfigError::Invalid {
                setting: "hash_table_floor".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.selector_threshold < 2 {
            return Err(ConfigError::Invalid {
                setting: "selector_threshold".into(),
                reason: "grouping needs at least 2 constant tests".into(),
            });
        }
        Ok(())
    }

    /// Hash index floor actually used: even values are bumped to the next odd number
    pub fn effective_hash_floor(&self) -> usize {
        self.hash_table_floor.max(1) | 1
    }
}

fn parse_setting<T: std::str::FromStr>(setting: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        setting: setting.to_string(),
        reason: format!("{value:?}: {e}"),
    })
}

fn default_hash_table_floor() -> usize {
    16231
}
fn default_gc_threshold() -> usize {
    64
}
fn default_selector_threshold() -> usize {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = FactBaseConfig::default();
        assert!(!config.allow_duplicates);
        assert_eq!(config.hash_table_floor, 16231);
        assert_eq!(config.gc_threshold, 64);
        assert!(config.incremental_reset);
        assert_eq!(config.selector_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FactBaseConfig::from_toml_str(
            r#"
allow_duplicates = true
gc_threshold = 8

[logging]
json = true
"#,
        )
        .unwrap();
        assert!(config.allow_duplicates);
        assert_eq!(config.gc_threshold, 8);
        assert_eq!(config.hash_table_floor, 16231);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_toml() {
        let err = FactBaseConfig::from_toml_str("gc_threshold = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> =
            [("DOVETAIL_ALLOW_DUPLICATES", "true"), ("DOVETAIL_HASH_TABLE_FLOOR", "100")].into();
        let config = FactBaseConfig::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert!(config.allow_duplicates);
        assert_eq!(config.hash_table_floor, 100);
        assert_eq!(config.effective_hash_floor(), 101);

        let err = FactBaseConfig::default()
            .with_overrides(|key| (key == "DOVETAIL_GC_THRESHOLD").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref setting, .. } if setting == "gc_threshold"));
    }

    #[test]
    fn test_validation() {
        let config = FactBaseConfig { hash_table_floor: 0, ..FactBaseConfig::default() };
        assert!(config.validate().is_err());
        let config = FactBaseConfig { selector_threshold: 1, ..FactBaseConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_reports_io_error() {
        let err = FactBaseConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
