//! Error types.
//!
//! Only conditions a caller can act on are surfaced as [`ScopeError`]. Storage
//! growth failure is carried as [`ScopeError::Allocation`] inside the crate and
//! always ends on the fatal path in [`crate::stack`].

use std::collections::TryReserveError;
use std::path::PathBuf;

use thiserror::Error;

/// Growable storage owned by the scope stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    /// The stack's scope slots.
    Scope,
    /// A scope's action slots.
    Action,
}

impl StorageKind {
    /// Fixed diagnostic message used when this storage cannot grow.
    #[must_use]
    pub const fn allocation_message(self) -> &'static str {
        match self {
            Self::Scope => "Couldn't allocate space for new KE scope",
            Self::Action => "Couldn't allocate space for new KE element",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scope => "scope",
            Self::Action => "action",
        }
    }
}

#[derive(Debug, Error)]
pub enum ScopeError {
    /// A registration carried both a resource handle and a callback while the
    /// payload policy is [`crate::PayloadPolicy::Reject`].
    #[error("cleanup action supplied both a resource handle and a callback")]
    AmbiguousPayload,
    #[error("{}", .kind.allocation_message())]
    Allocation {
        kind: StorageKind,
        #[source]
        source: TryReserveError,
    },
    #[error("failed to open structured log {}: {source}", .path.display())]
    LogSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScopeError {
    /// Growth failure of `kind` storage.
    #[must_use]
    pub fn allocation(kind: StorageKind) -> impl FnOnce(TryReserveError) -> Self {
        move |source| Self::Allocation { kind, source }
    }

    /// Storage that failed to grow, for [`ScopeError::Allocation`].
    #[must_use]
    pub fn storage_kind(&self) -> Option<StorageKind> {
        match self {
            Self::Allocation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_messages_match_diagnostic_contract() {
        assert_eq!(
            StorageKind::Scope.allocation_message(),
            "Couldn't allocate space for new KE scope"
        );
        assert_eq!(
            StorageKind::Action.allocation_message(),
            "Couldn't allocate space for new KE element"
        );
    }

    #[test]
    fn allocation_error_displays_fixed_message() {
        let source = Vec::<u8>::new()
            .try_reserve(usize::MAX)
            .expect_err("usize::MAX bytes must overflow capacity");
        let err = ScopeError::allocation(StorageKind::Action)(source);
        assert_eq!(err.to_string(), "Couldn't allocate space for new KE element");
        assert_eq!(err.storage_kind(), Some(StorageKind::Action));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(ScopeError::AmbiguousPayload.storage_kind(), None);
    }
}
