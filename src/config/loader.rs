// src/config/loader.rs
//! Configuration loader: TOML files layered with environment overrides

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::constants::paths;
use crate::config::AnalysisConfig;
use crate::error::EmgError;
use crate::error_context;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
    #[error("Configuration parse error: {0}")]
    ParseError(String),
    #[error("Configuration validation errors: {}", .0.join("; "))]
    ValidationError(Vec<String>),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for EmgError {
    fn from(err: ConfigError) -> Self {
        EmgError::InvalidConfiguration {
            reason: err.to_string(),
            context: error_context!("config_loader", "load"),
        }
    }
}

/// Loads an [`AnalysisConfig`] from the first layers found on disk plus environment
pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader over the default discovery paths with `HDEMG__` environment overrides
    pub fn new() -> Self {
        Self {
            config_paths: Self::discover_config_paths(),
            env_prefix: Some(paths::ENV_PREFIX.to_string()),
        }
    }

    /// Create loader with custom paths and no environment layer
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            config_paths: paths,
            env_prefix: None,
        }
    }

    /// Enable environment overrides, e.g. `HDEMG__TRACKING__THRESHOLD=0.85`
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }

    /// Merge every existing file in order (later files win), then the environment
    pub fn load(&self) -> Result<AnalysisConfig, ConfigError> {
        let mut builder = config::Config::builder();

        for path in &self.config_paths {
            debug!(path = %path.display(), exists = path.exists(), "config layer");
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        if let Some(prefix) = &self.env_prefix {
            builder = builder.add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator(paths::ENV_SEPARATOR)
                    .separator(paths::ENV_SEPARATOR),
            );
        }

        let config: AnalysisConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    /// Load a single file that must exist
    pub fn load_file(path: &Path) -> Result<AnalysisConfig, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::ParseError(format!("{}: {}", path.display(), err)))?;
        info!(path = %path.display(), "loading analysis configuration");
        Self::from_toml_str(&content)
    }

    /// Parse and validate an in-memory TOML document
    pub fn from_toml_str(content: &str) -> Result<AnalysisConfig, ConfigError> {
        let config: AnalysisConfig = toml::from_str(content)?;
        Self::validated(config)
    }

    fn validated(config: AnalysisConfig) -> Result<AnalysisConfig, ConfigError> {
        config.validate().map_err(ConfigError::ValidationError)?;
        Ok(config)
    }

    fn discover_config_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from(paths::CONFIG_FILE_NAME),
            Path::new(paths::CONFIG_DIR_NAME).join(paths::CONFIG_FILE_NAME),
        ]
    }
}
