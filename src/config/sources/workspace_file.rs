//! Workspace config file source: `.skillsmith/config.toml` and
//! `.skillsmith/{env}.toml`

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::Path;

/// Directory under the workspace root holding workspace config files
pub const WORKSPACE_CONFIG_DIR: &str = ".skillsmith";

/// Add workspace config files to builder.
/// Precedence: config.toml (base) then {env_name}.toml (env-specific).
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
    env_name: &str,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let config_dir = workspace_root.join(WORKSPACE_CONFIG_DIR);
    let mut builder = builder;

    let base_config_path = config_dir.join("config.toml");
    if base_config_path.exists() {
        builder = builder.add_source(File::from(base_config_path.as_path()).required(false));
    }

    let env_config_path = config_dir.join(format!("{}.toml", env_name));
    if env_config_path.exists() {
        builder = builder.add_source(File::from(env_config_path.as_path()).required(false));
    }

    Ok(builder)
}
