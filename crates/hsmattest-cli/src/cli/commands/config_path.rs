//! Config file discovery and command-line overrides.

use super::super::args::ModuleArgs;
use anyhow::Context;
use hsmattest_core::{load_config, PipelineConfig, DEFAULT_CONFIG_FILE};
use std::path::{Path, PathBuf};

/// Explicit path wins; otherwise `./hsmattest.yaml` is used when it exists.
pub fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.is_file().then_some(default)
        }
    }
}

/// Load the config file if there is one, falling back to built-in defaults.
pub fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    match detect_config_path(explicit) {
        Some(path) => {
            let config = load_config(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::debug!(config = %path.display(), "config loaded");
            Ok(config)
        }
        None => Ok(PipelineConfig::default()),
    }
}

impl ModuleArgs {
    /// Resolved config with `--module` and `--input-ownership` applied on top.
    pub fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = resolve_config(self.config.as_deref())?;
        if let Some(module) = &self.module {
            config = config.with_module(module);
        }
        if let Some(ownership) = self.input_ownership {
            config = config.with_input_ownership(ownership.into());
        }
        Ok(config)
    }
}
