//! Host platform pieces used by the boundary: `free`-released blocks,
//! `strerror(errno)` text, a raw fd diagnostic sink and C string decoding.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::io::{self, Write};
use std::ptr::NonNull;

use scopestack_core::{LastError, Release};

/// A block obtained from the C allocator, released with `free`.
#[derive(Debug)]
pub struct MallocBlock(NonNull<c_void>);

impl MallocBlock {
    /// `None` for a null pointer.
    #[must_use]
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[must_use]
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl Release for MallocBlock {
    fn release(self: Box<Self>) {
        // SAFETY: ownership of a malloc-family block was transferred to the
        // stack at registration and this is its only release.
        unsafe { libc::free(self.0.as_ptr()) }
    }
}

/// Calling thread's current `errno`.
#[must_use]
pub fn current_errno() -> c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// `strerror(errnum)` as an owned string.
#[must_use]
pub fn strerror_text(errnum: c_int) -> String {
    // SAFETY: strerror returns a NUL-terminated string valid until the next
    // strerror call on this thread; it is copied out immediately.
    let text = unsafe { libc::strerror(errnum) };
    if text.is_null() {
        return format!("Unknown error {errnum}");
    }
    // SAFETY: non-null pointer from strerror, see above.
    unsafe { CStr::from_ptr(text) }
        .to_string_lossy()
        .into_owned()
}

/// Reads `errno` at the moment of the report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrnoLastError;

impl LastError for ErrnoLastError {
    fn describe(&self) -> String {
        strerror_text(current_errno())
    }
}

/// Diagnostic sink writing straight to a file descriptor. The descriptor is
/// borrowed, never closed.
#[derive(Debug, Clone, Copy)]
pub struct FdWriter(pub c_int);

impl Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is a valid readable slice for buf.len() bytes.
        let n = unsafe { libc::write(self.0, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Decodes a C string argument; null reads as `(null)` like glibc `printf`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub unsafe fn c_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return "(null)".to_string();
    }
    // SAFETY: caller guarantees a NUL-terminated string.
    unsafe { CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

/// C `int` line number to the core's `u32`; negative lines read as 0.
#[must_use]
pub fn line_number(line: c_int) -> u32 {
    u32::try_from(line).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strerror_text_is_not_empty() {
        assert!(!strerror_text(libc::ENOENT).is_empty());
        assert!(!strerror_text(0).is_empty());
    }

    #[test]
    fn c_text_handles_null_and_utf8() {
        // SAFETY: null is allowed; the literal is NUL-terminated.
        unsafe {
            assert_eq!(c_text(std::ptr::null()), "(null)");
            assert_eq!(c_text(c"disk full".as_ptr()), "disk full");
        }
    }

    #[test]
    fn negative_lines_clamp_to_zero() {
        assert_eq!(line_number(-3), 0);
        assert_eq!(line_number(118), 118);
    }

    #[test]
    fn null_pointer_is_not_a_block() {
        assert!(MallocBlock::new(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn malloc_block_release_frees() {
        // SAFETY: plain malloc; released exactly once through the handle.
        let ptr = unsafe { libc::malloc(32) };
        let block = MallocBlock::new(ptr).expect("malloc(32) must succeed");
        assert_eq!(block.as_ptr(), ptr);
        Box::new(block).release();
    }
}
