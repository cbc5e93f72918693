//! Runtime Configuration Module
//!
//! Loads [`RuntimeConfig`] from an optional TOML file with environment
//! variable overrides.
//!
//! ```toml
//! [logging]
//! level = "info,messaging_objects=debug"
//! json = false
//!
//! [threads.converter]
//! stack_size_kb = 512
//! queue_warn_depth = 64
//! ```
//!
//! Keys are case-insensitive and stored lowercase, thread names included.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Default location probed by [`load_config`]
pub const DEFAULT_CONFIG_PATH: &str = "config/lumen.toml";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log output settings
    pub logging: LoggingConfig,

    /// Event loop settings keyed by thread name
    pub threads: HashMap<String, ThreadSettings>,
}

/// Log output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: defaults::logging::JSON,
        }
    }
}

/// Settings for one event loop thread
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ThreadSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size_kb: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_warn_depth: Option<usize>,
}

impl ThreadSettings {
    /// Stack size in bytes, `None` for the platform default
    pub fn stack_size_bytes(&self) -> Option<usize> {
        self.stack_size_kb.map(|kb| kb * 1024)
    }

    /// Queue warning depth, falling back to the default
    pub fn warn_depth(&self) -> usize {
        self.queue_warn_depth
            .unwrap_or(defaults::threads::QUEUE_WARN_DEPTH)
    }
}

impl RuntimeConfig {
    /// Load configuration from `path` with `LUMEN_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Load configuration, reading overrides from `env` instead of the
    /// process environment when given
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator(defaults::ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let config = builder
            .build()
            .context("Failed to build runtime configuration")?;

        let runtime: RuntimeConfig = config
            .try_deserialize()
            .context("Failed to deserialize runtime configuration")?;
        runtime.validate()?;

        debug!(
            level = %runtime.logging.level,
            json = runtime.logging.json,
            threads = runtime.threads.len(),
            "Runtime config loaded"
        );
        Ok(runtime)
    }

    /// Reject values no thread can be built with
    pub fn validate(&self) -> Result<()> {
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }

        for (name, settings) in &self.threads {
            if settings.stack_size_kb == Some(0) {
                bail!("threads.{}.stack_size_kb must be greater than zero", name);
            }
            if settings.queue_warn_depth == Some(0) {
                bail!("threads.{}.queue_warn_depth must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Settings for the thread called `name`, or defaults
    pub fn thread(&self, name: &str) -> ThreadSettings {
        self.threads
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize runtime configuration")
    }
}

/// Load configuration from `path`, or from [`DEFAULT_CONFIG_PATH`] if it
/// exists, falling back to defaults plus environment overrides
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(Some(path)),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                RuntimeConfig::load(Some(default))
            } else {
                debug!("No config file at {:?}, using defaults", default);
                RuntimeConfig::load(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[logging]
level = "debug"
json = true

[threads.converter]
stack_size_kb = 512
queue_warn_depth = 64

[threads.capture]
queue_warn_depth = 8
"#;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("lumen.toml");
        fs::write(&config_path, SAMPLE).unwrap();

        let config = RuntimeConfig::load_with_env(Some(&config_path), Some(HashMap::new())).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        let converter = config.thread("converter");
        assert_eq!(converter.stack_size_bytes(), Some(512 * 1024));
        assert_eq!(converter.warn_depth(), 64);

        let capture = config.thread("capture");
        assert_eq!(capture.stack_size_bytes(), None);
        assert_eq!(capture.warn_depth(), 8);
    }

    #[test]
    fn test_defaults_without_file() {
        let config = RuntimeConfig::load_with_env(None, Some(HashMap::new())).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.logging.level, defaults::logging::LEVEL);

        let unknown = config.thread("unknown");
        assert_eq!(unknown, ThreadSettings::default());
        assert_eq!(unknown.warn_depth(), defaults::threads::QUEUE_WARN_DEPTH);
    }

    #[test]
    fn test_environment_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("lumen.toml");
        fs::write(&config_path, SAMPLE).unwrap();

        let env = HashMap::from([
            ("LUMEN_LOGGING__LEVEL".to_string(), "warn".to_string()),
            ("LUMEN_THREADS__CONVERTER__QUEUE_WARN_DEPTH".to_string(), "16".to_string()),
            ("UNRELATED_LOGGING__LEVEL".to_string(), "trace".to_string()),
        ]);
        let config = RuntimeConfig::load_with_env(Some(&config_path), Some(env)).unwrap();

        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json);
        assert_eq!(config.thread("converter").warn_depth(), 16);
        assert_eq!(config.thread("converter").stack_size_kb, Some(512));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(RuntimeConfig::load_with_env(Some(&missing), Some(HashMap::new())).is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("lumen.toml");
        fs::write(&config_path, "[threads.converter]\nstack_size_kb = 0\n").unwrap();

        let err = RuntimeConfig::load_with_env(Some(&config_path), Some(HashMap::new())).unwrap_err();
        assert!(err.to_string().contains("stack_size_kb"));
    }

    #[test]
    fn test_rendered_toml_loads_back() {
        let mut config = RuntimeConfig::default();
        config.logging.level = "trace".to_string();
        config.threads.insert(
            "converter".to_string(),
            ThreadSettings {
                stack_size_kb: Some(256),
                queue_warn_depth: None,
            },
        );

        let dir = tempdir().unwrap();
        let config_path = dir.path().join("rendered.toml");
        fs::write(&config_path, config.to_toml().unwrap()).unwrap();

        let loaded = RuntimeConfig::load_with_env(Some(&config_path), Some(HashMap::new())).unwrap();
        assert_eq!(loaded, config);
    }
}
