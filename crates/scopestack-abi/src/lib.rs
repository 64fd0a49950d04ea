// Pointer contracts for the exports are stated once in `ke_abi`.
#![allow(clippy::missing_safety_doc)]
//! # scopestack-abi
//!
//! `extern "C"` boundary for scopestack. Exposes the `ke_*` cleanup API over a
//! thread-local [`scopestack_core::ScopeStack`], one per flow of control:
//!
//! ```text
//! C caller -> ke_* entry (this crate) -> thread-local ScopeStack -> unwind steps
//! ```
//!
//! Resource handles are `malloc`ed pointers released with `free`. Callbacks
//! are `void (*)(void)`. The platform error text is `strerror(errno)` read on
//! entry to each report function.
//!
//! Actions popped by the boundary run after the stack borrow is released, so
//! a callback may itself call back into `ke_*`.

pub mod ke_abi;
pub mod platform;
mod stack_state;
