//! Unwind plans.
//!
//! Every way of closing scopes (a normal pop, the three report entry points,
//! teardown) is an [`Unwind`] driven through [`crate::ScopeStack::unwind_step`].
//! Each step hands out at most one action, so a driver can run the action
//! after giving up its borrow of the stack. The thread-local C boundary relies
//! on that to let callbacks re-enter the API mid-unwind.

use serde::Serialize;

use crate::action::CleanupAction;

/// How far an unwind goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnwindTarget {
    /// Only the top scope.
    TopScope,
    /// Through the nearest function-boundary scope, or everything if none.
    FunctionBoundary,
    /// Every scope.
    All,
}

impl UnwindTarget {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TopScope => "top_scope",
            Self::FunctionBoundary => "function_boundary",
            Self::All => "all",
        }
    }
}

#[derive(Debug)]
pub enum UnwindStep {
    /// An action was removed. The driver runs it when [`Unwind::runs`].
    Action(CleanupAction),
    /// The top scope was empty and is now closed.
    ScopeClosed { boundary: bool },
    Done,
}

/// Counters for one unwind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnwindReport {
    pub scopes_closed: usize,
    pub actions_executed: usize,
    pub actions_discarded: usize,
}

#[derive(Debug, Clone)]
pub struct Unwind {
    target: UnwindTarget,
    run: bool,
    finished: bool,
    report: UnwindReport,
}

impl Unwind {
    #[must_use]
    pub fn new(target: UnwindTarget, run: bool) -> Self {
        Self {
            target,
            run,
            finished: false,
            report: UnwindReport::default(),
        }
    }

    #[must_use]
    pub fn target(&self) -> UnwindTarget {
        self.target
    }

    /// Whether removed actions are executed rather than discarded.
    #[must_use]
    pub fn runs(&self) -> bool {
        self.run
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn report(&self) -> UnwindReport {
        self.report
    }

    pub(crate) fn record_action(&mut self) {
        if self.run {
            self.report.actions_executed += 1;
        } else {
            self.report.actions_discarded += 1;
        }
    }

    pub(crate) fn record_scope_closed(&mut self, boundary: bool) {
        self.report.scopes_closed += 1;
        self.finished = match self.target {
            UnwindTarget::TopScope => true,
            UnwindTarget::FunctionBoundary => boundary,
            UnwindTarget::All => false,
        };
    }

    pub(crate) fn finish(&mut self) {
        self.finished = true;
    }
}
