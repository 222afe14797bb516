//! Engine configuration.
//!
//! ```toml
//! max_cascade_depth = 64
//! max_invocations = 10000
//! log_frames = false
//! ```
use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

const DEFAULT_MAX_CASCADE_DEPTH: usize = 64;
const DEFAULT_MAX_INVOCATIONS: usize = 10_000;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum number of rule firings between a root trigger and any
    /// invocation it causes.
    pub max_cascade_depth: usize,
    /// Maximum trace length for one cascade.
    pub max_invocations: usize,
    /// Dump full frames in debug logs.
    pub log_frames: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
            max_invocations: DEFAULT_MAX_INVOCATIONS,
            log_frames: false,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.  Missing keys take their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML or unknown keys,
    /// and `ConfigError::Invalid` if a bound is zero.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, and fails
    /// like [`EngineConfig::from_toml_str`] otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Checks that both cascade bounds are positive.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first zero bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cascade_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_cascade_depth must be > 0".to_string(),
            ));
        }

        if self.max_invocations == 0 {
            return Err(ConfigError::Invalid(
                "max_invocations must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[test]
fn test_defaults() {
    let config = EngineConfig::from_toml_str("").expect("ok");
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.max_cascade_depth, 64);
}

#[test]
fn test_partial_override() {
    let config =
        EngineConfig::from_toml_str("max_cascade_depth = 3\nlog_frames = true").expect("ok");
    assert_eq!(config.max_cascade_depth, 3);
    assert_eq!(config.max_invocations, DEFAULT_MAX_INVOCATIONS);
    assert!(config.log_frames);
}

#[test]
fn test_rejects_zero_bounds() {
    assert!(matches!(
        EngineConfig::from_toml_str("max_cascade_depth = 0"),
        Err(ConfigError::Invalid(_))
    ));
    assert!(matches!(
        EngineConfig::from_toml_str("max_invocations = 0"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_rejects_unknown_keys() {
    assert!(matches!(
        EngineConfig::from_toml_str("max_depth = 3"),
        Err(ConfigError::Parse(_))
    ));
}
