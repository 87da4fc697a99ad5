//! Integration tests for backup-orchestrator
//!
//! These tests require Docker plus the database client tools on the host.
//! Run with: `cargo test -p backup-orchestrator-tests --test integration -- --ignored`

mod postgres;
