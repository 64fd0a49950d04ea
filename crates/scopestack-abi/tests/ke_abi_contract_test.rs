//! Integration tests for the `ke_*` C surface.
//!
//! Every libtest case runs on its own thread, so each one starts with an
//! empty thread-local stack.

use std::cell::RefCell;
use std::ffi::{c_int, c_void};
use std::process::Command;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use scopestack_abi::ke_abi::{
    ke_action_count, ke_depth, ke_error, ke_error_exit, ke_error_kill, ke_free, ke_init,
    ke_pop_elem, ke_pop_elem_no, ke_pop_scope, ke_pop_scope_no, ke_push_elem, ke_push_scope,
    ke_set_output_fd,
};

const FATAL_CHILD_ENV: &str = "SCOPESTACK_ABI_FATAL_CHILD";

thread_local! {
    static TRACE: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

fn record(label: &'static str) {
    TRACE.with(|trace| trace.borrow_mut().push(label));
}

fn trace() -> Vec<&'static str> {
    TRACE.with(|trace| trace.borrow().clone())
}

unsafe extern "C" fn note_a() {
    record("a");
}

unsafe extern "C" fn note_b() {
    record("b");
}

unsafe extern "C" fn note_c() {
    record("c");
}

unsafe extern "C" fn note_inner() {
    record("inner");
}

unsafe extern "C" fn reentrant() {
    record("reentrant");
    ke_push_scope(false);
    // SAFETY: plain callback registration.
    unsafe { ke_push_elem(ptr::null_mut(), Some(note_inner)) };
    ke_pop_scope();
}

unsafe fn push_callback(f: unsafe extern "C" fn()) {
    // SAFETY: null pointer plus a valid callback.
    unsafe { ke_push_elem(ptr::null_mut(), Some(f)) };
}

fn write_stdout(text: &[u8]) {
    // SAFETY: fd 1 is open for the life of the test process.
    unsafe { libc::write(1, text.as_ptr().cast(), text.len()) };
}

unsafe extern "C" fn say_inner() {
    write_stdout(b"inner\n");
}

unsafe extern "C" fn say_outer() {
    write_stdout(b"outer\n");
}

#[cfg(target_os = "linux")]
fn set_errno(value: c_int) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = value };
}

#[cfg(target_os = "linux")]
fn capture_diagnostic(run: impl FnOnce()) -> String {
    let mut fds = [0 as c_int; 2];
    // SAFETY: fds has room for both pipe ends.
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    // SAFETY: fds[0] is the open read end; a missing write then fails the read.
    assert_eq!(unsafe { libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK) }, 0);
    ke_set_output_fd(fds[1]);
    run();
    ke_set_output_fd(2);
    let mut buf = [0_u8; 512];
    // SAFETY: buf is writable for its full length.
    let n = unsafe { libc::read(fds[0], buf.as_mut_ptr().cast(), buf.len()) };
    // SAFETY: both descriptors came from pipe() above.
    unsafe {
        libc::close(fds[0]);
        libc::close(fds[1]);
    }
    assert!(n > 0, "no diagnostic written");
    String::from_utf8_lossy(&buf[..n as usize]).into_owned()
}

#[test]
fn pop_scope_runs_callbacks_newest_first() {
    ke_init();
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe {
        push_callback(note_a);
        push_callback(note_b);
        push_callback(note_c);
    }
    assert_eq!(ke_action_count(), 3);

    ke_pop_scope();

    assert_eq!(trace(), vec!["c", "b", "a"]);
    assert_eq!(ke_depth(), 0);
    ke_free();
}

#[test]
fn pop_scope_no_skips_callbacks() {
    ke_init();
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_a) };
    ke_pop_scope_no();
    assert!(trace().is_empty());
    assert_eq!(ke_depth(), 0);
    ke_free();
}

#[test]
fn pop_elem_runs_or_skips_only_the_newest() {
    ke_init();
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe {
        push_callback(note_a);
        push_callback(note_b);
        push_callback(note_c);
    }
    ke_pop_elem();
    ke_pop_elem_no();
    assert_eq!(trace(), vec!["c"]);
    assert_eq!(ke_action_count(), 1);
    ke_free();
    assert_eq!(trace(), vec!["c", "a"]);
}

#[test]
fn null_payload_registers_nothing() {
    ke_init();
    // SAFETY: null pointer and no callback is a documented no-op.
    unsafe { ke_push_elem(ptr::null_mut(), None) };
    ke_push_scope(false);
    // SAFETY: as above.
    unsafe { ke_push_elem(ptr::null_mut(), None) };
    assert_eq!(ke_action_count(), 0);
    ke_free();
}

#[test]
fn malloced_pointer_is_freed_on_pop() {
    ke_init();
    ke_push_scope(false);
    // SAFETY: ownership of the block moves to the stack.
    unsafe {
        let block = libc::malloc(64);
        assert!(!block.is_null());
        ke_push_elem(block, None);
    }
    assert_eq!(ke_action_count(), 1);
    ke_pop_scope();
    assert_eq!(ke_depth(), 0);
    ke_free();
}

#[test]
fn discarded_pointer_stays_with_the_caller() {
    ke_init();
    ke_push_scope(false);
    // SAFETY: the block is registered, discarded, then freed here.
    unsafe {
        let block: *mut c_void = libc::calloc(4, 4);
        assert!(!block.is_null());
        ke_push_elem(block, None);
        ke_pop_elem_no();
        assert_eq!(ke_action_count(), 0);
        libc::free(block);
    }
    ke_free();
}

#[test]
fn callbacks_may_reenter_during_unwind() {
    ke_init();
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe {
        push_callback(note_a);
        push_callback(reentrant);
    }

    ke_pop_scope();

    assert_eq!(trace(), vec!["reentrant", "inner", "a"]);
    assert_eq!(ke_depth(), 0);
    ke_free();
}

#[test]
fn ke_error_stops_at_function_scope() {
    ke_init();
    ke_push_scope(true);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_a) };
    ke_push_scope(true);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_b) };
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_c) };

    capture_or_run(|| {
        // SAFETY: NUL-terminated literals.
        unsafe { ke_error(c"bad".as_ptr(), c"f.c".as_ptr(), 3) };
    });

    assert_eq!(trace(), vec!["c", "b"]);
    assert_eq!(ke_depth(), 1);
    ke_free();
    assert_eq!(trace(), vec!["c", "b", "a"]);
}

#[test]
fn ke_error_kill_unwinds_everything() {
    ke_init();
    ke_push_scope(true);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_a) };
    ke_push_scope(true);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_b) };

    capture_or_run(|| {
        // SAFETY: NUL-terminated literals.
        unsafe { ke_error_kill(c"abort".as_ptr(), c"f.c".as_ptr(), 9) };
    });

    assert_eq!(trace(), vec!["b", "a"]);
    assert_eq!(ke_depth(), 0);
    ke_free();
}

#[test]
fn ke_init_tears_down_leftover_state() {
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe { push_callback(note_a) };
    ke_init();
    assert_eq!(trace(), vec!["a"]);
    assert_eq!(ke_depth(), 0);
    ke_free();
}

static EXIT_CALLS: AtomicUsize = AtomicUsize::new(0);
static EXIT_DEPTH: AtomicUsize = AtomicUsize::new(usize::MAX);

unsafe extern "C" fn observe_depth_at_exit() {
    EXIT_DEPTH.store(ke_depth(), Ordering::SeqCst);
    EXIT_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn thread_exit_runs_pending_callbacks_without_reentry() {
    let worker = std::thread::spawn(|| {
        ke_push_scope(false);
        // SAFETY: valid callback.
        unsafe { push_callback(observe_depth_at_exit) };
        assert_eq!(ke_action_count(), 1);
    });
    assert!(worker.join().is_ok(), "thread exit must not panic");
    assert_eq!(EXIT_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(EXIT_DEPTH.load(Ordering::SeqCst), 0, "stack unreachable during teardown");
}

#[cfg(target_os = "linux")]
fn capture_or_run(run: impl FnOnce()) {
    let _ = capture_diagnostic(run);
}

#[cfg(not(target_os = "linux"))]
fn capture_or_run(run: impl FnOnce()) {
    run();
}

#[cfg(target_os = "linux")]
#[test]
fn diagnostic_uses_errno_text_at_entry() {
    ke_init();
    ke_push_scope(true);
    let text = capture_diagnostic(|| {
        set_errno(libc::ENOENT);
        // SAFETY: NUL-terminated literals.
        unsafe { ke_error(c"open failed".as_ptr(), c"main.c".as_ptr(), 7) };
    });
    assert_eq!(
        text,
        "ERROR in main.c at 7: open failed. This might help: No such file or directory\n"
    );
    ke_free();
}

#[cfg(target_os = "linux")]
#[test]
fn null_strings_print_as_null_marker() {
    ke_init();
    let text = capture_diagnostic(|| {
        set_errno(0);
        // SAFETY: null string arguments are accepted.
        unsafe { ke_error(ptr::null(), ptr::null(), -1) };
    });
    assert!(
        text.starts_with("ERROR in (null) at 0: (null). This might help: "),
        "got {text:?}"
    );
    ke_free();
}

#[cfg(target_os = "linux")]
#[test]
fn output_fd_survives_free_and_init() {
    let text = capture_diagnostic(|| {
        ke_free();
        ke_init();
        ke_push_scope(true);
        set_errno(0);
        // SAFETY: NUL-terminated literals.
        unsafe { ke_error(c"m".as_ptr(), c"f.c".as_ptr(), 1) };
    });
    assert!(
        text.starts_with("ERROR in f.c at 1: m. This might help: "),
        "got {text:?}"
    );
    ke_free();
}

/// Body of the fatal scenario; only acts when spawned by
/// `ke_error_exit_unwinds_and_exits_with_status_one`.
#[cfg(target_os = "linux")]
#[test]
fn ke_error_exit_child() {
    if std::env::var_os(FATAL_CHILD_ENV).is_none() {
        return;
    }
    ke_push_scope(true);
    // SAFETY: valid callbacks.
    unsafe { push_callback(say_outer) };
    ke_push_scope(false);
    // SAFETY: valid callbacks.
    unsafe { push_callback(say_inner) };
    set_errno(libc::ENOSPC);
    // SAFETY: NUL-terminated literals; never returns.
    unsafe { ke_error_exit(c"disk full".as_ptr(), c"writer.c".as_ptr(), 42) }
}

#[cfg(target_os = "linux")]
#[test]
fn ke_error_exit_unwinds_and_exits_with_status_one() {
    let exe = std::env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args(["--exact", "ke_error_exit_child", "--nocapture", "--test-threads", "1"])
        .env(FATAL_CHILD_ENV, "1")
        .env_remove("SCOPESTACK_LOG")
        .output()
        .expect("spawn fatal child");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains(
            "ERROR in writer.c at 42: disk full. This might help: No space left on device\n"
        ),
        "stderr: {stderr}"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let inner = stdout.find("inner\n").expect("inner callback ran");
    let outer = stdout.find("outer\n").expect("outer callback ran");
    assert!(inner < outer, "stdout: {stdout}");
}
