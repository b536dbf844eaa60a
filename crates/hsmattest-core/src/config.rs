//! Pipeline configuration (`hsmattest.yaml`).
//!
//! ```yaml
//! version: 1
//! module: ./hsmattest.wasm
//! input_ownership: host
//! limits:
//!   max_input_bytes: 1048576
//! ```
//!
//! A relative `module` path is resolved against the directory of the config file.

use crate::limits::{Limits, LimitsOverrides};
use crate::module::DEFAULT_LOG_IMPORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_FILE: &str = "hsmattest.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unsupported config version {found} (supported: {SUPPORTED_CONFIG_VERSION})")]
    UnsupportedVersion { found: u32 },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Who frees the input region after `parse`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputOwnership {
    /// The host releases the input through `dealloc` once the request is done.
    #[default]
    Host,
    /// `parse` takes ownership of its input and frees it itself.
    Module,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    version: u32,
    #[serde(default)]
    module: Option<PathBuf>,
    #[serde(default)]
    input_ownership: InputOwnership,
    #[serde(default)]
    log_import: Option<String>,
    #[serde(default)]
    limits: LimitsOverrides,
}

/// Resolved settings for a [`crate::Pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub module: Option<PathBuf>,
    pub input_ownership: InputOwnership,
    /// Name of the log callback import in module `env`.
    pub log_import: String,
    pub limits: Limits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            module: None,
            input_ownership: InputOwnership::default(),
            log_import: DEFAULT_LOG_IMPORT.to_string(),
            limits: Limits::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML document. Relative module paths are joined onto `base_dir`.
    pub fn from_yaml_str(raw: &str, base_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(raw)?;
        if file.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: file.version,
            });
        }

        let log_import = file
            .log_import
            .unwrap_or_else(|| DEFAULT_LOG_IMPORT.to_string());
        if log_import.trim().is_empty() {
            return Err(ConfigError::Invalid("log_import must not be empty".into()));
        }

        let module = file.module.map(|path| match base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        });

        Ok(Self {
            module,
            input_ownership: file.input_ownership,
            log_import,
            limits: Limits::default().apply(file.limits),
        })
    }

    pub fn with_module(mut self, module: impl Into<PathBuf>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_input_ownership(mut self, ownership: InputOwnership) -> Self {
        self.input_ownership = ownership;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    PipelineConfig::from_yaml_str(&raw, path.parent())
}
