//! Merge rules: defaults, override order, conflict handling.

use super::super::{
    default_api_base, default_branch, default_data_dir, default_fetch_workers, default_ignore,
    default_lock_file, default_lock_poll_ms, default_lock_timeout_ms, default_manifest_file,
    default_registry_id, default_registry_name, default_required_file, default_skills_dir,
    default_timeout_secs,
};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use std::path::Path;

/// Create a Config builder with the built-in defaults as the lowest layer.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("storage.data_dir", path_default(&default_data_dir()))?
        .set_default("storage.skills_dir", path_default(&default_skills_dir()))?
        .set_default("storage.manifest_file", path_default(&default_manifest_file()))?
        .set_default("storage.lock_file", path_default(&default_lock_file()))?
        .set_default("sync.fetch_workers", default_fetch_workers() as u64)?
        .set_default("sync.lock_timeout_ms", default_lock_timeout_ms())?
        .set_default("sync.lock_poll_ms", default_lock_poll_ms())?
        .set_default("sync.required_file", default_required_file())?
        .set_default("registry.name", default_registry_name())?
        .set_default("registry.id", default_registry_id())?
        .set_default("github.api_base", default_api_base())?
        .set_default("github.timeout_secs", default_timeout_secs())?
        .set_default("github.default_branch", default_branch())?
        .set_default("hashing.ignore", default_ignore())
}

fn path_default(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
