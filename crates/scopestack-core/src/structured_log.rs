//! Structured JSONL event log.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes records to stderr, a file, or a shared buffer.
//! - [`EventLog`]: emitter shared between the stacks of a process.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks.
//!
//! The event log is separate from the diagnostic line printed by the report
//! entry points; enabling or disabling it never changes that line.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LogTarget, process_config};
use crate::error::ScopeError;

/// Events the stack emits.
pub const KNOWN_EVENTS: &[&str] = &[
    "scope_pushed",
    "scope_closed",
    "action_registered",
    "action_executed",
    "action_discarded",
    "payload_rejected",
    "report",
    "unwind_finished",
    "allocation_failure",
    "teardown",
    "exit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Canonical event record.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    /// Scope depth after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
    /// Action count of the affected scope after the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary: Option<bool>,
    /// `release_resource` or `run_callback`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_kind: Option<String>,
    /// Unwind target (`top_scope`, `function_boundary`, `all`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Entry with required fields only. `trace_id` is filled in by the emitter.
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: String::new(),
            level,
            event: event.into(),
            depth: None,
            actions: None,
            boundary: None,
            action_kind: None,
            target: None,
            message: None,
            file: None,
            line: None,
            last_error: None,
            exit_code: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: usize) -> Self {
        self.actions = Some(actions);
        self
    }

    #[must_use]
    pub fn with_boundary(mut self, boundary: bool) -> Self {
        self.boundary = Some(boundary);
        self
    }

    #[must_use]
    pub fn with_action_kind(mut self, kind: impl Into<String>) -> Self {
        self.action_kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the source location.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    #[must_use]
    pub fn with_last_error(mut self, text: impl Into<String>) -> Self {
        self.last_error = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// In-memory sink readable after emission (for tests).
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Parsed entries, one per non-empty line.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.contents()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes JSONL entries. Each entry is one `write_all` of a full line so an
/// abrupt process exit never leaves a torn record behind.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>, run_id: impl Into<String>) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.into(),
        }
    }

    #[must_use]
    pub fn to_stderr() -> Self {
        Self::new(Box::new(io::stderr()), default_run_id())
    }

    /// Emitter appending to `path`, created if missing.
    pub fn to_file(path: &Path) -> Result<Self, ScopeError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| ScopeError::LogSink {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(Box::new(file), default_run_id()))
    }

    /// Emitter writing into a buffer the caller can read back.
    #[must_use]
    pub fn to_buffer(run_id: &str) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (Self::new(Box::new(buffer.clone()), run_id), buffer)
    }

    /// Emitter for a configured target. `Off` yields `None`.
    pub fn for_target(target: &LogTarget) -> Result<Option<Self>, ScopeError> {
        match target {
            LogTarget::Off => Ok(None),
            LogTarget::Stderr => Ok(Some(Self::to_stderr())),
            LogTarget::File(path) => Self::to_file(path).map(Some),
        }
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:06}", self.run_id, self.seq)
    }

    pub fn emit_entry(&mut self, mut entry: LogEntry) -> io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let mut line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Emitter shared by every stack that logs to the same target.
pub type EventLog = Arc<Mutex<LogEmitter>>;

#[must_use]
pub fn shared(emitter: LogEmitter) -> EventLog {
    Arc::new(Mutex::new(emitter))
}

/// Process-wide event log from `SCOPESTACK_LOG`, opened on first use.
///
/// A file that cannot be opened disables the log with a single warning.
#[must_use]
pub fn global_event_log() -> Option<EventLog> {
    static GLOBAL: OnceLock<Option<EventLog>> = OnceLock::new();
    GLOBAL
        .get_or_init(|| match LogEmitter::for_target(&process_config().log) {
            Ok(emitter) => emitter.map(shared),
            Err(err) => {
                eprintln!("scopestack: event log disabled: {err}");
                None
            }
        })
        .clone()
}

fn default_run_id() -> String {
    format!("scopestack-{}", std::process::id())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line_number}: field '{field}': {message}")]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl LogValidationError {
    fn new(line_number: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            line_number,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Err(vec![LogValidationError::new(
                line_number,
                "<json>",
                format!("invalid JSON: {e}"),
            )]);
        }
    };

    let Some(obj) = value.as_object() else {
        return Err(vec![LogValidationError::new(
            line_number,
            "<root>",
            "expected JSON object",
        )]);
    };

    let mut errors = Vec::new();

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError::new(
                line_number,
                field,
                "required field missing",
            ));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error", "fatal"].contains(&level)
    {
        errors.push(LogValidationError::new(
            line_number,
            "level",
            format!("invalid level: '{level}'"),
        ));
    }

    if let Some(event) = obj.get("event").and_then(|v| v.as_str())
        && !KNOWN_EVENTS.contains(&event)
    {
        errors.push(LogValidationError::new(
            line_number,
            "event",
            format!("unknown event: '{event}'"),
        ));
    }

    if let Some(kind) = obj.get("action_kind").and_then(|v| v.as_str())
        && !["release_resource", "run_callback"].contains(&kind)
    {
        errors.push(LogValidationError::new(
            line_number,
            "action_kind",
            format!("invalid action_kind: '{kind}'"),
        ));
    }

    if let Some(target) = obj.get("target").and_then(|v| v.as_str())
        && !["top_scope", "function_boundary", "all"].contains(&target)
    {
        errors.push(LogValidationError::new(
            line_number,
            "target",
            format!("invalid target: '{target}'"),
        ));
    }

    // Report events must say where they came from.
    if obj.get("event").and_then(|v| v.as_str()) == Some("report") {
        for field in ["message", "file", "line"] {
            if !obj.contains_key(field) {
                errors.push(LogValidationError::new(
                    line_number,
                    field,
                    "report events must include message and location",
                ));
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(value).map_err(|e| {
        vec![LogValidationError::new(
            line_number,
            "<schema>",
            format!("does not deserialize: {e}"),
        )]
    })
}

/// Validate every non-empty line of a JSONL file. Returns the entry count.
pub fn validate_log_file(path: &Path) -> Result<usize, Vec<LogValidationError>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        vec![LogValidationError::new(
            0,
            "<file>",
            format!("cannot read {}: {e}", path.display()),
        )]
    })?;

    let mut errors = Vec::new();
    let mut count = 0;
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match validate_log_line(line, i + 1) {
            Ok(_) => count += 1,
            Err(mut line_errors) => errors.append(&mut line_errors),
        }
    }

    if errors.is_empty() {
        Ok(count)
    } else {
        Err(errors)
    }
}

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}
