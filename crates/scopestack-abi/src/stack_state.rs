//! Per-thread stack behind the `ke_*` entry points.
//!
//! The stack lives in a `RefCell` that is only borrowed for a single step at a
//! time. Actions removed by a step run after the borrow ends, so a callback
//! that re-enters `ke_*` sees a consistent stack. A `ke_*` call made while the
//! borrow is held (only possible from inside the core, e.g. a callback run by
//! the allocation-failure path) is a no-op, and so is one made while the
//! thread-local is being destroyed at thread exit.

use std::cell::{Cell, RefCell};
use std::ffi::c_int;

use scopestack_core::{ScopeStack, Unwind, UnwindReport, UnwindStep, UnwindTarget};

use crate::platform::{ErrnoLastError, FdWriter};

const STDERR_FD: c_int = 2;

thread_local! {
    static STACK: RefCell<Option<ScopeStack>> = const { RefCell::new(None) };
    static OUTPUT_FD: Cell<c_int> = const { Cell::new(STDERR_FD) };
}

fn output_fd() -> c_int {
    OUTPUT_FD.try_with(Cell::get).unwrap_or(STDERR_FD)
}

fn fresh_stack() -> ScopeStack {
    ScopeStack::new()
        .with_last_error(ErrnoLastError)
        .with_output(FdWriter(output_fd()))
}

/// Runs `f` on this thread's stack, creating it on first use. `None` when
/// the stack is already borrowed further up the call chain or already gone.
pub(crate) fn with_stack<R>(f: impl FnOnce(&mut ScopeStack) -> R) -> Option<R> {
    STACK
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            Some(f(slot.get_or_insert_with(fresh_stack)))
        })
        .ok()
        .flatten()
}

/// Installs a fresh stack, returning the previous one (if any) so the caller
/// can tear it down outside the borrow.
pub(crate) fn replace_stack() -> Option<ScopeStack> {
    STACK
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            slot.replace(fresh_stack())
        })
        .ok()
        .flatten()
}

/// Removes this thread's stack; the next `ke_*` call starts a new one.
pub(crate) fn take_stack() -> Option<ScopeStack> {
    STACK
        .try_with(|cell| cell.try_borrow_mut().ok()?.take())
        .ok()
        .flatten()
}

/// Sends diagnostics of this thread's current and future stacks to `fd`.
pub(crate) fn set_output_fd(fd: c_int) {
    let _ = OUTPUT_FD.try_with(|cell| cell.set(fd));
    with_stack(|stack| stack.set_output(FdWriter(fd)));
}

/// Drives `plan` step by step, running each removed action between borrows.
pub(crate) fn drive(mut plan: Unwind) -> UnwindReport {
    loop {
        let Some(step) = with_stack(|stack| stack.unwind_step(&mut plan)) else {
            break;
        };
        match step {
            UnwindStep::Action(action) => {
                if plan.runs() {
                    action.execute();
                }
            }
            UnwindStep::ScopeClosed { .. } => {}
            UnwindStep::Done => break,
        }
    }
    plan.report()
}

/// Executing (`run`) or discarding unwind toward `target`.
pub(crate) fn drive_to(target: UnwindTarget, run: bool) -> UnwindReport {
    drive(Unwind::new(target, run))
}

/// Runs every pending action, then drops the stack and its storage.
pub(crate) fn shut_down() -> UnwindReport {
    let report = drive_to(UnwindTarget::All, true);
    if let Some(mut stack) = take_stack() {
        stack.teardown();
    }
    report
}
