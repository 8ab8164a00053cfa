//! Integration tests for the skill version and lock reconciliation engine

mod config_integration;
mod end_to_end;
mod lock_migration;
mod reconcile;
mod store_integration;
mod test_utils;
mod workspace_lock;
