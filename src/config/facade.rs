//! Config loading entry point

use super::merge::builder_with_defaults;
use super::sources::{environment, global_file, workspace_file};
use super::EngineConfig;
use crate::error::EngineError;
use config::{ConfigError, File};
use std::path::Path;
use tracing::debug;

/// Loads `EngineConfig` from its layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence (lowest to highest): defaults, global file, workspace
    /// `config.toml`, workspace `{SKILLSMITH_ENV}.toml`, `SKILLSMITH_*` variables.
    pub fn load(workspace_root: &Path) -> Result<EngineConfig, ConfigError> {
        let global = global_file::global_config_path();
        Self::load_layered(workspace_root, global.as_deref(), &environment::env_name(), true)
    }

    /// Load with explicit layer inputs.
    pub fn load_layered(
        workspace_root: &Path,
        global_config: Option<&Path>,
        env_name: &str,
        include_environment: bool,
    ) -> Result<EngineConfig, ConfigError> {
        let mut builder = builder_with_defaults()?;
        builder = global_file::add_to_builder(builder, global_config)?;
        builder = workspace_file::add_to_builder(builder, workspace_root, env_name)?;
        if include_environment {
            builder = environment::add_to_builder(builder);
        }

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        debug!(workspace = %workspace_root.display(), env = env_name, "Loaded configuration");
        Ok(config)
    }

    /// Load a single explicit file over the defaults.
    pub fn load_from_file(path: &Path) -> Result<EngineConfig, ConfigError> {
        builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()
    }

    /// `load` followed by `EngineConfig::validate`, as a single engine error.
    pub fn load_validated(workspace_root: &Path) -> Result<EngineConfig, EngineError> {
        let config = Self::load(workspace_root)?;
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            EngineError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        Ok(config)
    }
}
