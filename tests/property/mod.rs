//! Property-based tests for fingerprint and revision invariants

mod fingerprint;
