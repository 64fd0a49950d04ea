//! The scope stack.
//!
//! [`ScopeStack`] is an explicit context object: whoever owns it owns every
//! registered resource until the matching action is popped. It is `!Send`
//! because callbacks are plain `FnOnce()` closures, so a stack stays on the
//! flow of control that built it.

use std::io::{self, Write};

use crate::action::{ActionKind, Callback, CleanupAction, ResourceHandle};
use crate::config::{ScopeStackConfig, process_config};
use crate::error::{ScopeError, StorageKind};
use crate::report::{Diagnostic, FATAL_EXIT_STATUS, LastError, OsLastError, SourceLocation};
use crate::scope::Scope;
use crate::storage::SlotVec;
use crate::structured_log::{EventLog, LogEmitter, LogEntry, LogLevel, global_event_log, shared};
use crate::unwind::{Unwind, UnwindReport, UnwindStep, UnwindTarget};

pub struct ScopeStack {
    scopes: SlotVec<Scope>,
    config: ScopeStackConfig,
    out: Box<dyn Write>,
    last_error: Box<dyn LastError>,
    events: Option<EventLog>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    /// Empty stack using the process configuration and event log.
    #[must_use]
    pub fn new() -> Self {
        Self::assemble(process_config().clone(), global_event_log())
    }

    /// Empty stack with an explicit configuration. The event log named by
    /// `config.log` is opened for this stack alone.
    pub fn with_config(config: ScopeStackConfig) -> Result<Self, ScopeError> {
        let events = LogEmitter::for_target(&config.log)?.map(shared);
        Ok(Self::assemble(config, events))
    }

    fn assemble(config: ScopeStackConfig, events: Option<EventLog>) -> Self {
        Self {
            scopes: SlotVec::new(),
            config,
            out: Box::new(io::stderr()),
            last_error: Box::new(OsLastError),
            events,
        }
    }

    /// Replace the diagnostic sink (default: stderr).
    #[must_use]
    pub fn with_output<W: Write + 'static>(mut self, out: W) -> Self {
        self.out = Box::new(out);
        self
    }

    /// Replace the platform last-error source.
    #[must_use]
    pub fn with_last_error<E: LastError + 'static>(mut self, source: E) -> Self {
        self.last_error = Box::new(source);
        self
    }

    /// Replace the structured event log.
    #[must_use]
    pub fn with_event_log(mut self, events: Option<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn set_output<W: Write + 'static>(&mut self, out: W) {
        self.out = Box::new(out);
    }

    #[must_use]
    pub fn config(&self) -> &ScopeStackConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of open scopes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Scope slots currently allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.scopes.capacity()
    }

    /// Pending actions in the top scope (0 when the stack is empty).
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.scopes.top().map_or(0, Scope::action_count)
    }

    /// Pending actions across every open scope.
    #[must_use]
    pub fn total_actions(&self) -> usize {
        self.scopes.live().iter().map(Scope::action_count).sum()
    }

    #[must_use]
    pub fn top_action_capacity(&self) -> usize {
        self.scopes.top().map_or(0, Scope::action_capacity)
    }

    #[must_use]
    pub fn top_is_function_boundary(&self) -> Option<bool> {
        self.scopes.top().map(Scope::is_function_boundary)
    }

    /// Open scopes, bottom first.
    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        self.scopes.live()
    }

    // -----------------------------------------------------------------------
    // Scopes
    // -----------------------------------------------------------------------

    /// Opens a scope on top of the stack.
    #[track_caller]
    pub fn push_scope(&mut self, is_function_boundary: bool) {
        self.push_scope_at(is_function_boundary, SourceLocation::caller());
    }

    pub fn push_scope_at(&mut self, is_function_boundary: bool, location: SourceLocation<'_>) {
        let claimed = self
            .scopes
            .claim()
            .map(|scope| scope.open(is_function_boundary))
            .map_err(ScopeError::allocation(StorageKind::Scope));
        if let Err(err) = claimed {
            self.allocation_failure(&err, location);
        }
        self.log(LogLevel::Debug, "scope_pushed", |entry| {
            entry
                .with_depth(self.depth())
                .with_boundary(is_function_boundary)
        });
    }

    /// Closes the top scope, executing (`run`) or discarding its actions in
    /// reverse registration order. No-op on an empty stack.
    pub fn pop_scope(&mut self, run: bool) -> UnwindReport {
        let plan = Unwind::new(UnwindTarget::TopScope, run);
        self.unwind(plan, &mut |_: CleanupAction| {})
    }

    /// Closes the top scope without running its actions. The actions come
    /// back in pop order so their resources can be moved elsewhere;
    /// dropping them skips the release routine.
    #[must_use = "discarded actions own their resources"]
    pub fn pop_scope_discard(&mut self) -> Vec<CleanupAction> {
        let mut discarded = Vec::new();
        let plan = Unwind::new(UnwindTarget::TopScope, false);
        self.unwind(plan, &mut |action: CleanupAction| discarded.push(action));
        discarded
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Registers `action` in the top scope. Returns `false` (and drops the
    /// action) when no scope is open.
    #[track_caller]
    pub fn push_action(&mut self, action: CleanupAction) -> bool {
        self.push_action_at(action, SourceLocation::caller())
    }

    pub fn push_action_at(&mut self, action: CleanupAction, location: SourceLocation<'_>) -> bool {
        let kind = action.kind();
        let Some(scope) = self.scopes.top_mut() else {
            return false;
        };
        if let Err(err) = scope
            .push(action)
            .map_err(ScopeError::allocation(StorageKind::Action))
        {
            self.allocation_failure(&err, location);
        }
        self.log(LogLevel::Debug, "action_registered", |entry| {
            entry
                .with_depth(self.depth())
                .with_actions(self.action_count())
                .with_action_kind(kind.as_str())
        });
        true
    }

    /// Registers whichever payload is present.
    ///
    /// `Ok(false)` when no scope is open or neither payload is given; nothing
    /// grows in either case. Both payloads are settled by the configured
    /// [`crate::PayloadPolicy`].
    #[track_caller]
    pub fn push_action_parts(
        &mut self,
        resource: Option<ResourceHandle>,
        callback: Option<Callback>,
    ) -> Result<bool, ScopeError> {
        self.push_action_parts_at(resource, callback, SourceLocation::caller())
    }

    pub fn push_action_parts_at(
        &mut self,
        resource: Option<ResourceHandle>,
        callback: Option<Callback>,
        location: SourceLocation<'_>,
    ) -> Result<bool, ScopeError> {
        if self.is_empty() {
            return Ok(false);
        }
        match CleanupAction::from_parts(resource, callback, self.config.payload_policy) {
            Ok(Some(action)) => Ok(self.push_action_at(action, location)),
            Ok(None) => Ok(false),
            Err(err) => {
                self.log(LogLevel::Warn, "payload_rejected", |entry| {
                    entry
                        .with_depth(self.depth())
                        .with_message(err.to_string())
                        .with_location(location.file, location.line)
                });
                Err(err)
            }
        }
    }

    /// Registers release of an owned value.
    #[track_caller]
    pub fn push_release<T: 'static>(&mut self, value: T) -> bool {
        self.push_action_at(CleanupAction::release(value), SourceLocation::caller())
    }

    /// Registers a callback.
    #[track_caller]
    pub fn push_callback<F: FnOnce() + 'static>(&mut self, f: F) -> bool {
        self.push_action_at(CleanupAction::callback(f), SourceLocation::caller())
    }

    /// Removes the newest action of the top scope and, when `execute`, runs
    /// it. Returns the kind of the removed action; `None` when there was
    /// nothing to pop.
    ///
    /// With `execute == false` the action is dropped. A [`Callback`] is then
    /// never called and a custom [`crate::Release`] routine never runs, but a
    /// value registered through [`ScopeStack::push_release`] is still dropped,
    /// since dropping is its only effect. Use [`ScopeStack::pop_action_discard`]
    /// to keep such a value alive.
    pub fn pop_action(&mut self, execute: bool) -> Option<ActionKind> {
        let action = self.take_top_action(execute)?;
        let kind = action.kind();
        if execute {
            action.execute();
        }
        Some(kind)
    }

    /// Removes the newest action of the top scope without running it.
    #[must_use = "a discarded action owns its resource"]
    pub fn pop_action_discard(&mut self) -> Option<CleanupAction> {
        self.take_top_action(false)
    }

    /// Removes the newest action of the top scope and hands it to the
    /// caller. `execute` only labels the removal in the event log; running
    /// the action is the caller's job.
    pub fn take_top_action(&mut self, execute: bool) -> Option<CleanupAction> {
        let action = self.scopes.top_mut()?.take_last()?;
        self.log_action_removed(action.kind(), execute);
        Some(action)
    }

    // -----------------------------------------------------------------------
    // Unwinding
    // -----------------------------------------------------------------------

    /// Advances `plan` by one step.
    ///
    /// The top scope's newest action is removed and returned if there is one;
    /// otherwise the (now empty) top scope is closed. Drivers that run the
    /// returned actions outside their borrow of the stack may let those
    /// actions push and pop scopes; the plan simply continues from whatever
    /// the top is next.
    pub fn unwind_step(&mut self, plan: &mut Unwind) -> UnwindStep {
        if plan.is_finished() {
            return UnwindStep::Done;
        }
        let Some(scope) = self.scopes.top_mut() else {
            self.finish_unwind(plan);
            return UnwindStep::Done;
        };
        if let Some(action) = scope.take_last() {
            plan.record_action();
            self.log_action_removed(action.kind(), plan.runs());
            return UnwindStep::Action(action);
        }

        let boundary = self.scopes.retire_top().is_some_and(Scope::close);
        plan.record_scope_closed(boundary);
        self.log(LogLevel::Debug, "scope_closed", |entry| {
            entry
                .with_depth(self.depth())
                .with_boundary(boundary)
                .with_target(plan.target().as_str())
        });
        if plan.is_finished() {
            self.log_unwind_finished(plan);
        }
        UnwindStep::ScopeClosed { boundary }
    }

    /// Drives `plan` to completion, executing actions inline when the plan
    /// runs them and passing them to `discard` otherwise.
    fn unwind(&mut self, mut plan: Unwind, discard: &mut dyn FnMut(CleanupAction)) -> UnwindReport {
        loop {
            match self.unwind_step(&mut plan) {
                UnwindStep::Action(action) if plan.runs() => action.execute(),
                UnwindStep::Action(action) => discard(action),
                UnwindStep::ScopeClosed { .. } => {}
                UnwindStep::Done => return plan.report(),
            }
        }
    }

    fn finish_unwind(&self, plan: &mut Unwind) {
        plan.finish();
        self.log_unwind_finished(plan);
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    /// Prints a diagnostic and unwinds, with execution, through the nearest
    /// function-boundary scope (or the whole stack if there is none). Scopes
    /// of outer functions stay open.
    #[track_caller]
    pub fn report_local(&mut self, message: &str) -> UnwindReport {
        self.report_local_at(message, SourceLocation::caller())
    }

    pub fn report_local_at(&mut self, message: &str, location: SourceLocation<'_>) -> UnwindReport {
        self.report_at(message, location, UnwindTarget::FunctionBoundary)
    }

    /// Prints a diagnostic and unwinds every scope with execution. The
    /// process keeps running.
    #[track_caller]
    pub fn report_and_unwind_all(&mut self, message: &str) -> UnwindReport {
        self.report_and_unwind_all_at(message, SourceLocation::caller())
    }

    pub fn report_and_unwind_all_at(
        &mut self,
        message: &str,
        location: SourceLocation<'_>,
    ) -> UnwindReport {
        self.report_at(message, location, UnwindTarget::All)
    }

    /// Prints a diagnostic, unwinds every scope with execution, tears the
    /// stack down and exits the process with status 1.
    #[track_caller]
    pub fn report_fatal(&mut self, message: &str) -> ! {
        self.report_fatal_at(message, SourceLocation::caller())
    }

    pub fn report_fatal_at(&mut self, message: &str, location: SourceLocation<'_>) -> ! {
        self.report_and_unwind_all_at(message, location);
        self.teardown();
        self.terminate(FATAL_EXIT_STATUS)
    }

    fn report_at(
        &mut self,
        message: &str,
        location: SourceLocation<'_>,
        target: UnwindTarget,
    ) -> UnwindReport {
        let diagnostic = self.capture_diagnostic(message, location);
        let plan = self.begin_report(&diagnostic, target);
        self.unwind(plan, &mut |_: CleanupAction| {})
    }

    /// Writes `diagnostic`, records the report and returns the executing
    /// unwind toward `target` for the caller to drive with
    /// [`ScopeStack::unwind_step`].
    pub fn begin_report(&mut self, diagnostic: &Diagnostic<'_>, target: UnwindTarget) -> Unwind {
        self.write_diagnostic(diagnostic);
        self.log(LogLevel::Error, "report", |entry| {
            entry
                .with_depth(self.depth())
                .with_message(diagnostic.message)
                .with_location(diagnostic.location.file, diagnostic.location.line)
                .with_last_error(diagnostic.last_error.as_str())
                .with_target(target.as_str())
        });
        Unwind::new(target, true)
    }

    /// Builds the diagnostic for `message`, capturing the platform error text
    /// now.
    #[must_use]
    pub fn capture_diagnostic<'a>(
        &self,
        message: &'a str,
        location: SourceLocation<'a>,
    ) -> Diagnostic<'a> {
        Diagnostic::new(message, location, self.last_error.describe())
    }

    /// Writes one diagnostic line to the output sink. Sink errors are
    /// ignored: a failing sink must not stop the unwind.
    pub fn write_diagnostic(&mut self, diagnostic: &Diagnostic<'_>) {
        let _ = writeln!(self.out, "{diagnostic}");
        let _ = self.out.flush();
    }

    // -----------------------------------------------------------------------
    // Teardown and fatal paths
    // -----------------------------------------------------------------------

    /// Runs every remaining action of every scope, top down, then releases
    /// all storage. The stack is afterwards indistinguishable from a new one.
    pub fn teardown(&mut self) -> UnwindReport {
        let plan = Unwind::new(UnwindTarget::All, true);
        let report = self.unwind(plan, &mut |_: CleanupAction| {});
        self.scopes.release();
        self.log(LogLevel::Info, "teardown", |entry| {
            entry.with_depth(0).with_details(serde_json::json!({
                "scopes_closed": report.scopes_closed,
                "actions_executed": report.actions_executed,
            }))
        });
        report
    }

    /// Growth failure: diagnostic, best-effort cleanup of everything the
    /// stack holds, exit(1).
    fn allocation_failure(&mut self, err: &ScopeError, location: SourceLocation<'_>) -> ! {
        self.record_allocation_failure(err, location);
        self.teardown();
        self.terminate(FATAL_EXIT_STATUS)
    }

    fn record_allocation_failure(&mut self, err: &ScopeError, location: SourceLocation<'_>) {
        let message = err.to_string();
        let diagnostic = self.capture_diagnostic(&message, location);
        self.write_diagnostic(&diagnostic);
        let storage = err.storage_kind().map_or("unknown", StorageKind::as_str);
        let reason = std::error::Error::source(err).map(ToString::to_string);
        self.log(LogLevel::Fatal, "allocation_failure", |entry| {
            entry
                .with_depth(self.depth())
                .with_message(message.as_str())
                .with_location(location.file, location.line)
                .with_last_error(diagnostic.last_error.as_str())
                .with_details(serde_json::json!({
                    "storage": storage,
                    "reason": reason,
                }))
        });
    }

    fn terminate(&mut self, status: i32) -> ! {
        self.log(LogLevel::Fatal, "exit", |entry| {
            entry.with_depth(0).with_exit_code(status)
        });
        let _ = self.out.flush();
        if let Some(events) = &self.events {
            let _ = events.lock().flush();
        }
        std::process::exit(status)
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    fn log(&self, level: LogLevel, event: &str, build: impl FnOnce(LogEntry) -> LogEntry) {
        if let Some(events) = &self.events {
            let entry = build(LogEntry::new(level, event));
            let _ = events.lock().emit_entry(entry);
        }
    }

    fn log_action_removed(&self, kind: ActionKind, executed: bool) {
        let event = if executed {
            "action_executed"
        } else {
            "action_discarded"
        };
        self.log(LogLevel::Trace, event, |entry| {
            entry
                .with_depth(self.depth())
                .with_actions(self.action_count())
                .with_action_kind(kind.as_str())
        });
    }

    fn log_unwind_finished(&self, plan: &Unwind) {
        let report = plan.report();
        self.log(LogLevel::Debug, "unwind_finished", |entry| {
            entry
                .with_depth(self.depth())
                .with_target(plan.target().as_str())
                .with_details(serde_json::json!({
                    "scopes_closed": report.scopes_closed,
                    "actions_executed": report.actions_executed,
                    "actions_discarded": report.actions_discarded,
                }))
        });
    }
}

impl Drop for ScopeStack {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if !self.is_empty() {
            self.teardown();
        }
    }
}
