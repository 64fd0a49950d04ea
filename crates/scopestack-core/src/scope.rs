//! A single scope: pending actions plus the function-boundary flag.

use std::collections::TryReserveError;

use crate::action::CleanupAction;
use crate::storage::SlotVec;

/// Scope slot owned by the stack.
///
/// Live action slots always hold `Some`; slots past the count are `None`.
/// A closed slot keeps its action storage so the next scope opened at the
/// same index reuses it.
#[derive(Debug, Default)]
pub struct Scope {
    actions: SlotVec<Option<CleanupAction>>,
    is_function_boundary: bool,
}

impl Scope {
    #[must_use]
    pub fn is_function_boundary(&self) -> bool {
        self.is_function_boundary
    }

    #[must_use]
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn action_capacity(&self) -> usize {
        self.actions.capacity()
    }

    pub(crate) fn open(&mut self, is_function_boundary: bool) {
        debug_assert!(self.actions.is_empty(), "reopened scope slot not drained");
        self.is_function_boundary = is_function_boundary;
    }

    pub(crate) fn push(&mut self, action: CleanupAction) -> Result<(), TryReserveError> {
        *self.actions.claim()? = Some(action);
        Ok(())
    }

    /// Removes the most recently pushed action, clearing its slot.
    pub(crate) fn take_last(&mut self) -> Option<CleanupAction> {
        self.actions.retire_top().and_then(Option::take)
    }

    /// Resets the slot after its actions are drained. Returns the boundary
    /// flag the scope was opened with.
    pub(crate) fn close(&mut self) -> bool {
        debug_assert!(self.actions.is_empty(), "closing scope with pending actions");
        std::mem::take(&mut self.is_function_boundary)
    }
}
