//! Diagnostics shared by the report entry points.
//!
//! Every report writes exactly one line:
//!
//! ```text
//! ERROR in <file> at <line>: <message>. This might help: <platform-error-text>
//! ```
//!
//! The platform text is captured through a [`LastError`] source before the
//! line is formatted, so it reflects whatever error state was current at the
//! call, related to the failure or not.

use std::fmt;
use std::io;
use std::panic::Location;

/// Call site of a report or of a growth request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation<'a> {
    pub file: &'a str,
    pub line: u32,
}

impl<'a> SourceLocation<'a> {
    #[must_use]
    pub const fn new(file: &'a str, line: u32) -> Self {
        Self { file, line }
    }
}

impl SourceLocation<'static> {
    /// Location of the caller of the enclosing `#[track_caller]` function.
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line())
    }
}

impl fmt::Display for SourceLocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Source of the platform's last-error description.
pub trait LastError {
    fn describe(&self) -> String;
}

/// Reads the calling thread's OS error (errno on Unix).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLastError;

impl LastError for OsLastError {
    fn describe(&self) -> String {
        os_error_text(&io::Error::last_os_error())
    }
}

/// Always reports the same text. Useful for deterministic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedLastError(pub String);

impl LastError for FixedLastError {
    fn describe(&self) -> String {
        self.0.clone()
    }
}

/// `strerror`-style text of an OS error, without std's `(os error N)` suffix.
#[must_use]
pub fn os_error_text(err: &io::Error) -> String {
    let text = err.to_string();
    match err.raw_os_error() {
        Some(code) => match text.strip_suffix(&format!(" (os error {code})")) {
            Some(stripped) => stripped.to_string(),
            None => text,
        },
        None => text,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic<'a> {
    pub message: &'a str,
    pub location: SourceLocation<'a>,
    pub last_error: String,
}

impl<'a> Diagnostic<'a> {
    #[must_use]
    pub fn new(message: &'a str, location: SourceLocation<'a>, last_error: String) -> Self {
        Self {
            message,
            location,
            last_error,
        }
    }
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ERROR in {} at {}: {}. This might help: {}",
            self.location.file, self.location.line, self.message, self.last_error
        )
    }
}

/// Exit status used by every fatal path.
pub const FATAL_EXIT_STATUS: i32 = 1;

/// Report locally: unwind through the nearest function-boundary scope.
///
/// `ke_error!(stack, "message")` records `file!()`/`line!()` of the macro call.
#[macro_export]
macro_rules! ke_error {
    ($stack:expr, $message:expr) => {
        $stack.report_local_at($message, $crate::SourceLocation::new(file!(), line!()))
    };
}

/// Report and unwind every scope.
#[macro_export]
macro_rules! ke_error_kill {
    ($stack:expr, $message:expr) => {
        $stack.report_and_unwind_all_at($message, $crate::SourceLocation::new(file!(), line!()))
    };
}

/// Report, unwind every scope and exit with status 1.
#[macro_export]
macro_rules! ke_error_exit {
    ($stack:expr, $message:expr) => {
        $stack.report_fatal_at($message, $crate::SourceLocation::new(file!(), line!()))
    };
}
