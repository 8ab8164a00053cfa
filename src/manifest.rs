//! Package manifest (`skillsmith.toml`)
//!
//! ```toml
//! [skills.alpha]
//! source = "acme/skills/alpha"
//! version = "1.2.0"       # optional pin
//!
//! [skills.local-tools]
//! source = "./tools"
//! name = "tools"          # optional install name override
//! ```

use crate::error::EngineError;
use crate::types::is_valid_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One declared package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDeclaration {
    /// Manifest key
    pub key: String,
    pub source: String,
    pub name_override: Option<String>,
    pub pinned_version: Option<String>,
}

impl PackageDeclaration {
    pub fn new(key: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: source.into(),
            name_override: None,
            pinned_version: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name_override = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.pinned_version = Some(version.into());
        self
    }

    /// Install name: the override if given, else the manifest key. Lock
    /// entries and working tree directories are keyed by it.
    pub fn name(&self) -> &str {
        self.name_override.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    skills: BTreeMap<String, ManifestSkill>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestSkill {
    source: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

/// Parsed manifest, re-read every reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub declarations: Vec<PackageDeclaration>,
}

impl Manifest {
    /// Read the manifest file. A missing file is an error, never an empty
    /// manifest.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if !path.exists() {
            return Err(EngineError::Manifest(format!(
                "manifest {} not found",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| EngineError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let file: ManifestFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let declarations = file
            .skills
            .into_iter()
            .map(|(key, skill)| PackageDeclaration {
                key,
                source: skill.source,
                name_override: skill.name,
                pinned_version: skill.version,
            })
            .collect();
        let manifest = Self { declarations };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check install names are usable and unique.
    pub fn validate(&self) -> Result<(), String> {
        validate_declarations(&self.declarations)
    }
}

pub(crate) fn validate_declarations(declarations: &[PackageDeclaration]) -> Result<(), String> {
    let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
    for decl in declarations {
        let name = decl.name();
        if !is_valid_name(name) {
            return Err(format!("invalid package name '{}' (declared as '{}')", name, decl.key));
        }
        if decl.source.trim().is_empty() {
            return Err(format!("package '{}' has an empty source", decl.key));
        }
        if let Some(other) = seen.insert(name, &decl.key) {
            return Err(format!(
                "package name '{}' is declared twice (by '{}' and '{}')",
                name, other, decl.key
            ));
        }
    }
    Ok(())
}
