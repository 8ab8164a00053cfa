//! Environment source: `SKILLSMITH_<SECTION>__<KEY>`, e.g.
//! `SKILLSMITH_SYNC__FETCH_WORKERS=8`.
//!
//! Flat names under the prefix (`SKILLSMITH_ENV`, `SKILLSMITH_LOG`,
//! `SKILLSMITH_LOG_FORMAT`, `SKILLSMITH_LOG_OUTPUT`) are read elsewhere and
//! never reach the config tree.

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, Map};

pub const ENV_PREFIX: &str = "SKILLSMITH";

/// Name of the variable selecting the environment-specific workspace file
pub const ENV_NAME_VAR: &str = "SKILLSMITH_ENV";

const SECTION_SEPARATOR: &str = "__";

pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    add_vars_to_builder(builder, std::env::vars())
}

/// Add the section-scoped subset of `vars` as the environment layer.
pub fn add_vars_to_builder<I>(builder: ConfigBuilder<DefaultState>, vars: I) -> ConfigBuilder<DefaultState>
where
    I: IntoIterator<Item = (String, String)>,
{
    let scoped: Map<String, String> = vars
        .into_iter()
        .filter(|(name, _)| is_section_key(name))
        .collect();
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(SECTION_SEPARATOR)
            .try_parsing(true)
            .source(Some(scoped)),
    )
}

/// True for `SKILLSMITH_<SECTION>__<KEY>` names.
fn is_section_key(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    upper
        .strip_prefix(ENV_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
        .map_or(false, |rest| {
            rest.split(SECTION_SEPARATOR).count() > 1
                && rest.split(SECTION_SEPARATOR).all(|part| !part.is_empty())
        })
}

/// Selected environment name, `development` when unset.
pub fn env_name() -> String {
    std::env::var(ENV_NAME_VAR).unwrap_or_else(|_| "development".to_string())
}
