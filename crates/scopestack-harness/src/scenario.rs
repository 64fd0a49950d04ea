//! Named cleanup scenarios.
//!
//! Each scenario builds a stack, registers labelled resources and callbacks,
//! and drives one of the commit or report paths. Every release is printed to
//! stdout the moment it happens (`released <label>` / `called <label>`), so
//! the order stays observable even when the scenario ends the process.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use clap::ValueEnum;
use serde::Serialize;

use scopestack_core::{
    Callback, CleanupAction, FixedLastError, PayloadPolicy, ResourceHandle, ScopeError, ScopeStack,
    ScopeStackConfig, UnwindReport, ke_error_exit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// h1, h2 in one scope, committed: released h2 then h1.
    CommitLifo,
    /// Function scope plus a block scope holding one callback, reported locally.
    ReportLocal,
    /// `[F(b), A, G(b), B]` reported locally: B and G close, F and A stay.
    ReportLocalNested,
    /// Three function scopes unwound by a non-fatal full unwind.
    UnwindAll,
    /// Scope discarded; the caller takes the handles back and releases them.
    DiscardReturnsOwnership,
    /// Resource and callback in one registration under the reject policy.
    RejectDoublePayload,
    /// Two scopes each holding one resource, then a fatal "disk full" report.
    FatalDiskFull,
    /// Same as `fatal-disk-full`, through the `ke_error_exit!` macro.
    FatalMacro,
}

impl Scenario {
    pub const ALL: [Scenario; 8] = [
        Scenario::CommitLifo,
        Scenario::ReportLocal,
        Scenario::ReportLocalNested,
        Scenario::UnwindAll,
        Scenario::DiscardReturnsOwnership,
        Scenario::RejectDoublePayload,
        Scenario::FatalDiskFull,
        Scenario::FatalMacro,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CommitLifo => "commit-lifo",
            Self::ReportLocal => "report-local",
            Self::ReportLocalNested => "report-local-nested",
            Self::UnwindAll => "unwind-all",
            Self::DiscardReturnsOwnership => "discard-returns-ownership",
            Self::RejectDoublePayload => "reject-double-payload",
            Self::FatalDiskFull => "fatal-disk-full",
            Self::FatalMacro => "fatal-macro",
        }
    }

    /// Whether the scenario ends the process with status 1.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::FatalDiskFull | Self::FatalMacro)
    }

    fn config(self, base: ScopeStackConfig) -> ScopeStackConfig {
        match self {
            Self::RejectDoublePayload => base.with_payload_policy(PayloadPolicy::Reject),
            _ => base,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Stack(#[from] ScopeError),
    #[error("scenario {scenario}: {message}")]
    Unexpected {
        scenario: &'static str,
        message: String,
    },
}

/// Summary of a scenario that returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioOutcome {
    pub scenario: &'static str,
    pub events: Vec<String>,
    pub unwind: UnwindReport,
    pub depth_after: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

/// Ordered record of releases and callback invocations.
#[derive(Clone, Default)]
struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    fn note(&self, line: String) {
        println!("{line}");
        let _ = std::io::stdout().flush();
        self.0.borrow_mut().push(line);
    }

    fn handle(&self, label: &'static str) -> ResourceHandle {
        let journal = self.clone();
        ResourceHandle::with_release(label, move |label| journal.note(format!("released {label}")))
    }

    fn resource(&self, label: &'static str) -> CleanupAction {
        CleanupAction::ReleaseResource(self.handle(label))
    }

    fn callback(&self, label: &'static str) -> Callback {
        let journal = self.clone();
        Callback::new(move || journal.note(format!("called {label}")))
    }

    fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Options shared by every scenario run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fixed text for the "This might help" part of diagnostics; the OS error
    /// text when unset.
    pub last_error: Option<String>,
}

/// Runs `scenario` with the process environment's configuration. Fatal
/// scenarios do not return.
pub fn run(scenario: Scenario, options: &RunOptions) -> Result<ScenarioOutcome, HarnessError> {
    let config = scenario.config(ScopeStackConfig::from_env());
    let mut stack = ScopeStack::with_config(config)?;
    if let Some(text) = &options.last_error {
        stack = stack.with_last_error(FixedLastError(text.clone()));
    }
    run_on(scenario, &mut stack)
}

/// Runs `scenario` on a caller-built stack.
pub fn run_on(scenario: Scenario, stack: &mut ScopeStack) -> Result<ScenarioOutcome, HarnessError> {
    let journal = Journal::default();
    let mut rejected = None;

    let unwind = match scenario {
        Scenario::CommitLifo => {
            stack.push_scope(false);
            stack.push_action(journal.resource("h1"));
            stack.push_action(journal.resource("h2"));
            stack.pop_scope(true)
        }
        Scenario::ReportLocal => {
            stack.push_scope(true);
            stack.push_scope(false);
            stack.push_action(CleanupAction::RunCallback(journal.callback("c")));
            stack.report_local("callback scenario")
        }
        Scenario::ReportLocalNested => {
            for (label, boundary) in [("F", true), ("A", false), ("G", true), ("B", false)] {
                stack.push_scope(boundary);
                stack.push_action(journal.resource(label));
            }
            stack.report_local("nested scenario")
        }
        Scenario::UnwindAll => {
            for label in ["F", "G", "H"] {
                stack.push_scope(true);
                stack.push_action(journal.resource(label));
            }
            stack.report_and_unwind_all("unwind scenario")
        }
        Scenario::DiscardReturnsOwnership => {
            stack.push_scope(false);
            stack.push_action(journal.resource("kept"));
            stack.push_action(CleanupAction::RunCallback(journal.callback("skipped")));
            let discarded = stack.pop_scope_discard();
            let report = UnwindReport {
                scopes_closed: 1,
                actions_executed: 0,
                actions_discarded: discarded.len(),
            };
            for handle in discarded.into_iter().filter_map(CleanupAction::into_resource) {
                handle.release();
            }
            report
        }
        Scenario::RejectDoublePayload => {
            stack.push_scope(false);
            match stack.push_action_parts(Some(journal.handle("both")), Some(journal.callback("both")))
            {
                Err(err @ ScopeError::AmbiguousPayload) => rejected = Some(err.to_string()),
                Err(err) => return Err(err.into()),
                Ok(registered) => {
                    return Err(HarnessError::Unexpected {
                        scenario: scenario.name(),
                        message: format!("double payload accepted (registered={registered})"),
                    });
                }
            }
            stack.pop_scope(true)
        }
        Scenario::FatalDiskFull => {
            stack.push_scope(true);
            stack.push_action(journal.resource("h1"));
            stack.push_scope(false);
            stack.push_action(journal.resource("h2"));
            stack.report_fatal("disk full")
        }
        Scenario::FatalMacro => {
            stack.push_scope(true);
            stack.push_action(journal.resource("h1"));
            stack.push_scope(false);
            stack.push_action(journal.resource("h2"));
            ke_error_exit!(stack, "disk full")
        }
    };

    Ok(ScenarioOutcome {
        scenario: scenario.name(),
        events: journal.lines(),
        unwind,
        depth_after: stack.depth(),
        rejected,
    })
}
