//! # scopestack-core
//!
//! Explicit, deterministic cleanup for error paths.
//!
//! A [`ScopeStack`] holds nested scopes, each with an ordered list of pending
//! [`CleanupAction`]s. Callers push a scope when entering a block or function,
//! register actions as they acquire resources, and then either pop the scope
//! (the actions run as committed cleanup) or call one of the report entry
//! points, which print a diagnostic and unwind:
//!
//! ```text
//! report_local           -> unwind through the nearest function-boundary scope
//! report_and_unwind_all  -> unwind every scope, keep running
//! report_fatal           -> unwind every scope, tear down, exit(1)
//! ```
//!
//! No `unsafe` code is permitted at the crate level. The `extern "C"` surface
//! lives in `scopestack-abi`.

#![deny(unsafe_code)]

pub mod action;
pub mod config;
pub mod error;
#[macro_use]
pub mod report;
pub mod scope;
pub mod stack;
pub mod storage;
pub mod structured_log;
pub mod unwind;

pub use action::{ActionKind, Callback, CleanupAction, Release, ResourceHandle};
pub use config::{LogTarget, PayloadPolicy, ScopeStackConfig};
pub use error::{ScopeError, StorageKind};
pub use report::{
    Diagnostic, FATAL_EXIT_STATUS, FixedLastError, LastError, OsLastError, SourceLocation,
};
pub use scope::Scope;
pub use stack::ScopeStack;
pub use structured_log::{EventLog, LogEmitter, LogEntry, LogLevel};
pub use unwind::{Unwind, UnwindReport, UnwindStep, UnwindTarget};
