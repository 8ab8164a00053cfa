//! Forward-only lock file schema migration
//!
//! Schema history:
//! - v1: no marker, `[skills.<name>]` with `source`, `integrity`, `resolved`, `commit`
//! - v2: `schema_version = 2`, `[skills.<name>]` adding `registry`, `snapshot_id`,
//!   `local_revision`, `upstream_version`
//! - v3: `schema_version = 3`, `[packages.<name>]` holding a full `LockEntry`
//!
//! Each step rewrites the entries it understands and copies the rest through
//! verbatim, listing them in the report.

use super::{read_document, schema_version, write_document, CURRENT_SCHEMA_VERSION};
use crate::error::EngineError;
use crate::fetch::SourceRef;
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

const DEFAULT_REGISTRY_ID: &str = "default";

/// Outcome of `migrate_lock_file`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Entries rewritten into the current schema
    pub migrated: Vec<String>,
    /// Entries carried through untouched because they could not be read
    pub unrecognized: Vec<String>,
}

impl MigrationReport {
    pub fn nothing_to_migrate(&self) -> bool {
        self.from_version == self.to_version
    }
}

/// Bring the lock file at `path` up to the current schema.
///
/// A current (or missing) file is left byte-identical. A file written by a
/// newer schema fails with `SchemaMigration` and is not touched.
pub fn migrate_lock_file(path: &Path) -> Result<MigrationReport, EngineError> {
    if !path.exists() {
        return Ok(MigrationReport {
            from_version: CURRENT_SCHEMA_VERSION,
            to_version: CURRENT_SCHEMA_VERSION,
            migrated: Vec::new(),
            unrecognized: Vec::new(),
        });
    }

    let mut document = read_document(path)?;
    let from_version = schema_version(&document)?;
    if from_version > CURRENT_SCHEMA_VERSION {
        return Err(EngineError::SchemaMigration(format!(
            "cannot downgrade lock file from schema version {} to {}",
            from_version, CURRENT_SCHEMA_VERSION
        )));
    }

    if from_version == CURRENT_SCHEMA_VERSION {
        let store = super::LockStore::load(path)?;
        info!(path = %path.display(), "Lock file already current; nothing to migrate");
        return Ok(MigrationReport {
            from_version,
            to_version: CURRENT_SCHEMA_VERSION,
            migrated: Vec::new(),
            unrecognized: store.unrecognized(),
        });
    }

    let mut version = from_version;
    let mut unrecognized = Vec::new();
    let mut migrated = Vec::new();
    while version < CURRENT_SCHEMA_VERSION {
        let step = match version {
            1 => v1_to_v2(&mut document),
            2 => v2_to_v3(&mut document),
            other => {
                return Err(EngineError::SchemaMigration(format!(
                    "no migration path from schema version {}",
                    other
                )))
            }
        };
        version += 1;
        for name in step.unrecognized {
            if !unrecognized.contains(&name) {
                unrecognized.push(name);
            }
        }
        migrated = step.migrated;
    }

    write_document(path, &document)?;
    for name in &unrecognized {
        warn!(package = %name, "Lock entry not recognized during migration; kept as-is");
    }
    info!(
        path = %path.display(),
        from = from_version,
        to = CURRENT_SCHEMA_VERSION,
        migrated = migrated.len(),
        unrecognized = unrecognized.len(),
        "Migrated lock file"
    );

    Ok(MigrationReport {
        from_version,
        to_version: CURRENT_SCHEMA_VERSION,
        migrated,
        unrecognized,
    })
}

#[derive(Default)]
struct StepOutcome {
    migrated: Vec<String>,
    unrecognized: Vec<String>,
}

fn v1_to_v2(document: &mut toml::Table) -> StepOutcome {
    let mut outcome = StepOutcome::default();
    if let Some(toml::Value::Table(skills)) = document.get_mut("skills") {
        for (name, value) in skills.iter_mut() {
            let Some(table) = value.as_table_mut() else {
                outcome.unrecognized.push(name.clone());
                continue;
            };
            let source = table.get("source").and_then(|v| v.as_str()).map(str::to_string);
            let integrity = table
                .get("integrity")
                .and_then(|v| v.as_str())
                .and_then(SnapshotId::parse);
            let (Some(source), Some(integrity)) = (source, integrity) else {
                outcome.unrecognized.push(name.clone());
                continue;
            };

            table.insert("registry".into(), registry_for(&source).into());
            table.insert("snapshot_id".into(), integrity.to_string().into());
            table.insert("local_revision".into(), toml::Value::Integer(0));
            outcome.migrated.push(name.clone());
        }
    }
    document.insert("schema_version".into(), toml::Value::Integer(2));
    outcome
}

fn v2_to_v3(document: &mut toml::Table) -> StepOutcome {
    let mut outcome = StepOutcome::default();
    let mut packages = toml::Table::new();

    if let Some(toml::Value::Table(skills)) = document.remove("skills") {
        for (name, value) in skills {
            match v2_entry_to_v3(&name, &value) {
                Some(entry) => {
                    packages.insert(name.clone(), entry);
                    outcome.migrated.push(name);
                }
                None => {
                    outcome.unrecognized.push(name.clone());
                    packages.insert(name, value);
                }
            }
        }
    }

    document.insert("packages".into(), toml::Value::Table(packages));
    document.insert(
        "schema_version".into(),
        toml::Value::Integer(CURRENT_SCHEMA_VERSION as i64),
    );
    outcome
}

fn v2_entry_to_v3(name: &str, value: &toml::Value) -> Option<toml::Value> {
    let table = value.as_table()?;
    let text = |key: &str| table.get(key).and_then(|v| v.as_str()).map(str::to_string);

    let source = text("source")?;
    let integrity = SnapshotId::parse(&text("integrity")?)?;
    let head = match text("snapshot_id") {
        Some(raw) => SnapshotId::parse(&raw)?,
        None => integrity.clone(),
    };
    let revision = match table.get("local_revision") {
        Some(toml::Value::Integer(v)) if *v >= 0 => *v,
        None => 0,
        Some(_) => return None,
    };
    let registry = text("registry").unwrap_or_else(|| registry_for(&source));

    let mut entry = toml::Table::new();
    entry.insert("name".into(), name.into());
    entry.insert("origin_registry".into(), registry_for(&source).into());
    entry.insert("origin_ref".into(), text("resolved").unwrap_or(source).into());
    entry.insert("registry".into(), registry.into());
    entry.insert("registry_id".into(), DEFAULT_REGISTRY_ID.into());
    if let Some(version) = text("upstream_version") {
        entry.insert("upstream_version".into(), version.into());
    }
    entry.insert("local_revision".into(), toml::Value::Integer(revision));
    entry.insert("integrity_hash".into(), integrity.to_string().into());
    entry.insert("head_snapshot_id".into(), head.to_string().into());
    Some(toml::Value::Table(entry))
}

fn registry_for(source: &str) -> String {
    SourceRef::parse(source)
        .map(|s| s.registry().to_string())
        .unwrap_or_else(|_| "local".to_string())
}
