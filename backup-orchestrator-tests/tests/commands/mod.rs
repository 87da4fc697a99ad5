//! Workflow tests for the backup orchestrator
//!
//! These tests drive backup, restore, catalog and retention operations
//! through scripted adapters and mock storage.

mod backup;
mod catalog;
mod restore;
