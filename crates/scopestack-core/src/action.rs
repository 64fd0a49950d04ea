//! Cleanup actions.
//!
//! A [`CleanupAction`] is either the release of an owned resource or a
//! callback. The sum type makes "exactly one payload" a construction-time
//! fact; [`CleanupAction::from_parts`] is the bridge for callers (such as the
//! C boundary) that hold two optional payloads.

use std::fmt;

use crate::config::PayloadPolicy;
use crate::error::ScopeError;

/// A resource that can be released by value.
pub trait Release {
    fn release(self: Box<Self>);
}

struct Owned<T>(T);

impl<T> Release for Owned<T> {
    fn release(self: Box<Self>) {
        drop(self.0);
    }
}

struct ReleaseWith<T, F> {
    value: T,
    release: F,
}

impl<T, F: FnOnce(T)> Release for ReleaseWith<T, F> {
    fn release(self: Box<Self>) {
        let this = *self;
        (this.release)(this.value);
    }
}

/// Opaque owned handle handed to the stack at registration.
///
/// Dropping a handle without calling [`ResourceHandle::release`] drops the
/// Rust value but skips the release routine, which is how a discarded action
/// leaks a foreign resource.
pub struct ResourceHandle {
    inner: Box<dyn Release>,
}

impl ResourceHandle {
    pub fn new<R: Release + 'static>(resource: R) -> Self {
        Self {
            inner: Box::new(resource),
        }
    }

    /// Handle whose release drops `value`.
    pub fn owned<T: 'static>(value: T) -> Self {
        Self::new(Owned(value))
    }

    /// Handle whose release passes `value` to `release`.
    pub fn with_release<T: 'static, F: FnOnce(T) + 'static>(value: T, release: F) -> Self {
        Self::new(ReleaseWith { value, release })
    }

    pub fn release(self) {
        self.inner.release();
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResourceHandle(..)")
    }
}

/// Niladic callback; its return value is never observed.
pub struct Callback(Box<dyn FnOnce()>);

impl Callback {
    pub fn new<F: FnOnce() + 'static>(f: F) -> Self {
        Self(Box::new(f))
    }

    pub fn invoke(self) {
        (self.0)();
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    ReleaseResource,
    RunCallback,
}

impl ActionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReleaseResource => "release_resource",
            Self::RunCallback => "run_callback",
        }
    }
}

#[derive(Debug)]
pub enum CleanupAction {
    ReleaseResource(ResourceHandle),
    RunCallback(Callback),
}

impl CleanupAction {
    pub fn release<T: 'static>(value: T) -> Self {
        Self::ReleaseResource(ResourceHandle::owned(value))
    }

    pub fn callback<F: FnOnce() + 'static>(f: F) -> Self {
        Self::RunCallback(Callback::new(f))
    }

    /// Builds an action from two optional payloads.
    ///
    /// Neither present yields `Ok(None)`. Both present is settled by `policy`:
    /// [`PayloadPolicy::PreferResource`] keeps the handle and drops the
    /// callback, [`PayloadPolicy::Reject`] refuses the registration.
    pub fn from_parts(
        resource: Option<ResourceHandle>,
        callback: Option<Callback>,
        policy: PayloadPolicy,
    ) -> Result<Option<Self>, ScopeError> {
        match (resource, callback) {
            (Some(_), Some(_)) if policy == PayloadPolicy::Reject => {
                Err(ScopeError::AmbiguousPayload)
            }
            (Some(handle), _) => Ok(Some(Self::ReleaseResource(handle))),
            (None, Some(callback)) => Ok(Some(Self::RunCallback(callback))),
            (None, None) => Ok(None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::ReleaseResource(_) => ActionKind::ReleaseResource,
            Self::RunCallback(_) => ActionKind::RunCallback,
        }
    }

    /// Runs the action's effect.
    pub fn execute(self) {
        match self {
            Self::ReleaseResource(handle) => handle.release(),
            Self::RunCallback(callback) => callback.invoke(),
        }
    }

    /// Hands back the handle of a release action that was not executed.
    #[must_use]
    pub fn into_resource(self) -> Option<ResourceHandle> {
        match self {
            Self::ReleaseResource(handle) => Some(handle),
            Self::RunCallback(_) => None,
        }
    }
}
