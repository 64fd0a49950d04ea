//! Scenario runner and event-log tooling for scopestack.
//!
//! This crate provides:
//! - Named scenarios covering commit, local report, full unwind, discard and
//!   the process-fatal paths (which cannot run inside a test process)
//! - Structured JSONL event-log validation

#![forbid(unsafe_code)]

pub mod scenario;

pub use scenario::{HarnessError, RunOptions, Scenario, ScenarioOutcome};
