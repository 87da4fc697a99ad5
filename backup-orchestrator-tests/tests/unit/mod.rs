//! Unit tests for the building blocks below the orchestrator
//!
//! Codecs, the archive coordinator, storage backends and configuration.

mod archive;
mod config;
mod storage;
