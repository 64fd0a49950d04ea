//! `ke_*` exports.
//!
//! Pointers passed to `ke_push_elem` must come from the malloc family; the
//! stack frees them on execution and leaks them on discard. Callbacks take
//! no arguments. String arguments to the report functions must be null or
//! NUL-terminated.

use std::ffi::{c_char, c_int, c_void};

use scopestack_core::{
    Callback, Diagnostic, FATAL_EXIT_STATUS, LastError, ResourceHandle, SourceLocation,
    UnwindTarget,
};

use crate::platform::{ErrnoLastError, MallocBlock, c_text, line_number};
use crate::stack_state::{drive, drive_to, replace_stack, set_output_fd, shut_down, with_stack};

/// C cleanup callback.
pub type KeCallback = unsafe extern "C" fn();

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Starts this thread's stack afresh. A stack left over from earlier use is
/// torn down first, running its pending actions.
#[unsafe(no_mangle)]
pub extern "C" fn ke_init() {
    if let Some(mut previous) = replace_stack() {
        previous.teardown();
    }
}

/// Runs every pending action, top scope first, and releases all storage.
#[unsafe(no_mangle)]
pub extern "C" fn ke_free() {
    shut_down();
}

/// Redirects this thread's diagnostics to `fd` (default 2), including those
/// of stacks started later by `ke_init`. The descriptor stays owned by the
/// caller.
#[unsafe(no_mangle)]
pub extern "C" fn ke_set_output_fd(fd: c_int) {
    set_output_fd(fd);
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn ke_push_scope(is_function_scope: bool) {
    let location = SourceLocation::new(file!(), line!());
    with_stack(|stack| stack.push_scope_at(is_function_scope, location));
}

#[unsafe(no_mangle)]
pub extern "C" fn ke_pop_scope() {
    drive_to(UnwindTarget::TopScope, true);
}

#[unsafe(no_mangle)]
pub extern "C" fn ke_pop_scope_no() {
    drive_to(UnwindTarget::TopScope, false);
}

#[unsafe(no_mangle)]
pub extern "C" fn ke_depth() -> usize {
    with_stack(|stack| stack.depth()).unwrap_or(0)
}

#[unsafe(no_mangle)]
pub extern "C" fn ke_action_count() -> usize {
    with_stack(|stack| stack.action_count()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Registers `pointer` for `free`, or `function` for a call. With both set
/// the pointer wins unless `SCOPESTACK_PAYLOAD_POLICY` rejects the pair.
/// A null pointer with no function registers nothing.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ke_push_elem(pointer: *mut c_void, function: Option<KeCallback>) {
    let resource = MallocBlock::new(pointer).map(ResourceHandle::new);
    let callback = function.map(|f| {
        // SAFETY: the caller registers a valid argument-less C function.
        Callback::new(move || unsafe { f() })
    });
    let location = SourceLocation::new(file!(), line!());
    // A rejected pair is already logged by the stack; C callers get no status.
    let _ = with_stack(|stack| stack.push_action_parts_at(resource, callback, location));
}

#[unsafe(no_mangle)]
pub extern "C" fn ke_pop_elem() {
    if let Some(Some(action)) = with_stack(|stack| stack.take_top_action(true)) {
        action.execute();
    }
}

/// Removes the newest action unrun. A registered pointer is not freed.
#[unsafe(no_mangle)]
pub extern "C" fn ke_pop_elem_no() {
    with_stack(|stack| {
        let _ = stack.take_top_action(false);
    });
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Prints the diagnostic and unwinds through the nearest function scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ke_error(message: *const c_char, file: *const c_char, line: c_int) {
    // SAFETY: forwarded caller contract.
    unsafe { report(message, file, line, UnwindTarget::FunctionBoundary) };
}

/// Prints the diagnostic and unwinds every scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ke_error_kill(message: *const c_char, file: *const c_char, line: c_int) {
    // SAFETY: forwarded caller contract.
    unsafe { report(message, file, line, UnwindTarget::All) };
}

/// Prints the diagnostic, unwinds every scope, frees the stack and exits
/// with status 1.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ke_error_exit(
    message: *const c_char,
    file: *const c_char,
    line: c_int,
) -> ! {
    // SAFETY: forwarded caller contract.
    unsafe { report(message, file, line, UnwindTarget::All) };
    shut_down();
    std::process::exit(FATAL_EXIT_STATUS)
}

/// errno is read before anything else can overwrite it.
unsafe fn report(message: *const c_char, file: *const c_char, line: c_int, target: UnwindTarget) {
    let last_error = ErrnoLastError.describe();
    // SAFETY: forwarded caller contract.
    let (message, file) = unsafe { (c_text(message), c_text(file)) };
    let diagnostic = Diagnostic::new(
        &message,
        SourceLocation::new(&file, line_number(line)),
        last_error,
    );
    if let Some(plan) = with_stack(|stack| stack.begin_report(&diagnostic, target)) {
        drive(plan);
    }
}
