//! Global config file source: `$XDG_CONFIG_HOME/skillsmith/config.toml`
//! (or the platform equivalent).

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path to the user-level config file, if a home directory is known.
pub fn global_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("skillsmith").join("config.toml"))
}

/// Add the global config file to the builder if it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: Option<&Path>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let Some(path) = path else {
        return Ok(builder);
    };
    if !path.exists() {
        debug!(config_path = %path.display(), "No global configuration file");
        return Ok(builder);
    }
    let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(builder.add_source(File::from(canonical.as_path()).required(false)))
}
