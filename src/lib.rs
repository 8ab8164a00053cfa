//! Skillsmith: skill version & lock reconciliation
//!
//! Keeps installed skill packages in sync with a declarative manifest and
//! gives each package a small, linear, content-addressed version history
//! (commit, stash, tag, checkout, diff, status) on top of an immutable record
//! of where it was first imported from.

pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod history;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod reconcile;
pub mod store;
pub mod tree;
pub mod types;
pub mod workspace;

pub use api::SkillApi;
pub use config::{ConfigLoader, EngineConfig};
pub use error::{EngineError, FetchError, ReconciliationError, StorageError};
pub use reconcile::SyncReport;
pub use types::SnapshotId;
