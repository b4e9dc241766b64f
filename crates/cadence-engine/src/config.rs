//! Configuration loading and typed config structures for the tick driver.
//!
//! The canonical configuration lives in `cadence.yaml` at the project root.
//! Every section and key is optional; missing values take the defaults
//! documented on each field.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable overriding `cursor.path`.
pub const CURSOR_PATH_ENV: &str = "CADENCE_CURSOR_PATH";

/// Top-level engine configuration.
///
/// Mirrors the structure of `cadence.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Tick execution limits.
    #[serde(default)]
    pub tick: TickConfig,

    /// Where the cursor is persisted.
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `CADENCE_CURSOR_PATH` overrides `cursor.path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty mapping.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config
            .cursor
            .apply_env_overrides(std::env::var(CURSOR_PATH_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "tick.max_concurrency",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.tick.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick.timeout_ms",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

/// Tick execution limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TickConfig {
    /// Assets evaluated at once within one dependency level.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Wall-clock budget for one tick, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Tick counter assumed when no cursor has been stored.
    #[serde(default)]
    pub default_evaluation_id: i64,
}

impl TickConfig {
    /// The tick budget as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_timeout_ms(),
            default_evaluation_id: 0,
        }
    }
}

/// Cursor persistence settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CursorConfig {
    /// File holding the serialized cursor.
    #[serde(default = "default_cursor_path")]
    pub path: PathBuf,
}

impl CursorConfig {
    /// Replace the path with `override_path` when one is set.
    pub fn apply_env_overrides(&mut self, override_path: Option<String>) {
        if let Some(path) = override_path.filter(|path| !path.is_empty()) {
            self.path = PathBuf::from(path);
        }
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            path: default_cursor_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const fn default_max_concurrency() -> usize {
    8
}

const fn default_timeout_ms() -> u64 {
    30_000
}

fn default_cursor_path() -> PathBuf {
    PathBuf::from("cadence-cursor.txt")
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.tick.max_concurrency, 8);
        assert_eq!(config.tick.timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
tick:
  max_concurrency: 2
  timeout_ms: 500
  default_evaluation_id: 40

cursor:
  path: "/var/lib/cadence/cursor"

logging:
  level: "cadence_engine=debug"
  json: true
"#;
        let config = EngineConfig::parse(yaml);
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.tick.max_concurrency, 2);
        assert_eq!(config.tick.timeout_ms, 500);
        assert_eq!(config.tick.default_evaluation_id, 40);
        assert_eq!(config.logging.level, "cadence_engine=debug");
        assert!(config.logging.json);
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = EngineConfig::parse("tick:\n  timeout_ms: 250\n");
        assert!(config.is_ok());
        let config = config.ok().unwrap_or_default();

        assert_eq!(config.tick.timeout_ms, 250);
        // Everything else uses defaults
        assert_eq!(config.tick.max_concurrency, 8);
        assert!(!config.logging.json);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(EngineConfig::parse("").is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = EngineConfig::parse("tick:\n  max_concurrency: 0\n");
        assert!(matches!(
            config,
            Err(ConfigError::Invalid {
                field: "tick.max_concurrency",
                ..
            })
        ));
    }

    #[test]
    fn cursor_path_override() {
        let mut cursor = CursorConfig::default();
        cursor.apply_env_overrides(Some(String::new()));
        assert_eq!(cursor.path, default_cursor_path());
        cursor.apply_env_overrides(Some("/tmp/elsewhere".to_owned()));
        assert_eq!(cursor.path, PathBuf::from("/tmp/elsewhere"));
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("cadence.yaml");
        if path.exists() {
            let config = EngineConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
