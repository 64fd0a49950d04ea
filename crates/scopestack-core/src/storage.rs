//! Doubling slot storage.
//!
//! Both the stack's scopes and each scope's actions live in a [`SlotVec`]:
//! a run of default-initialized slots plus a logical count. Capacity starts
//! at zero, grows to `max(1, capacity) * 2` when the count reaches it, and
//! never shrinks until [`SlotVec::release`]. Slots past the count keep
//! whatever state their owner reset them to, so a retired scope slot keeps
//! its action storage for the next scope pushed at that index.

use std::collections::TryReserveError;

#[derive(Debug)]
pub struct SlotVec<T> {
    slots: Vec<T>,
    len: usize,
}

impl<T> Default for SlotVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotVec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Logical count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of initialized slots (logical capacity).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    #[must_use]
    pub fn top(&self) -> Option<&T> {
        self.len.checked_sub(1).map(|i| &self.slots[i])
    }

    #[must_use]
    pub fn top_mut(&mut self) -> Option<&mut T> {
        self.len.checked_sub(1).map(|i| &mut self.slots[i])
    }

    /// Live slots, bottom first.
    #[must_use]
    pub fn live(&self) -> &[T] {
        &self.slots[..self.len]
    }

    /// Removes the top slot from the logical count and hands it back so the
    /// owner can reset it in place.
    pub fn retire_top(&mut self) -> Option<&mut T> {
        let index = self.len.checked_sub(1)?;
        self.len = index;
        Some(&mut self.slots[index])
    }

    /// Drops every slot and returns capacity to zero.
    pub fn release(&mut self) {
        self.slots = Vec::new();
        self.len = 0;
    }
}

impl<T: Default> SlotVec<T> {
    /// Next capacity under the doubling policy.
    #[must_use]
    pub fn next_capacity(capacity: usize) -> usize {
        capacity.max(1).saturating_mul(2)
    }

    /// Doubles capacity. Existing slots are untouched, new slots are
    /// `T::default()`. On failure nothing changes.
    pub fn grow(&mut self) -> Result<(), TryReserveError> {
        let target = Self::next_capacity(self.slots.len());
        self.slots.try_reserve_exact(target - self.slots.len())?;
        self.slots.resize_with(target, T::default);
        Ok(())
    }

    /// Claims the next slot, growing first when full.
    pub fn claim(&mut self) -> Result<&mut T, TryReserveError> {
        if self.is_full() {
            self.grow()?;
        }
        let index = self.len;
        self.len += 1;
        Ok(&mut self.slots[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_doubles_from_two() {
        let mut slots: SlotVec<u32> = SlotVec::new();
        assert_eq!(slots.capacity(), 0);

        let mut seen = Vec::new();
        for i in 0..9 {
            *slots.claim().unwrap() = i;
            seen.push(slots.capacity());
        }
        assert_eq!(seen, vec![2, 2, 4, 4, 8, 8, 8, 8, 16]);
        assert_eq!(slots.len(), 9);
    }

    #[test]
    fn next_capacity_treats_zero_as_one() {
        assert_eq!(SlotVec::<u8>::next_capacity(0), 2);
        assert_eq!(SlotVec::<u8>::next_capacity(1), 2);
        assert_eq!(SlotVec::<u8>::next_capacity(2), 4);
        assert_eq!(SlotVec::<u8>::next_capacity(usize::MAX), usize::MAX);
    }

    #[test]
    fn growth_keeps_entries_and_defaults_new_slots() {
        let mut slots: SlotVec<Option<u32>> = SlotVec::new();
        *slots.claim().unwrap() = Some(7);
        *slots.claim().unwrap() = Some(8);
        *slots.claim().unwrap() = Some(9);
        assert_eq!(slots.live(), &[Some(7), Some(8), Some(9)]);
        assert_eq!(slots.capacity(), 4);
        assert_eq!(slots.slots[3], None);
    }

    #[test]
    fn retire_never_shrinks_capacity() {
        let mut slots: SlotVec<u32> = SlotVec::new();
        for i in 0..5 {
            *slots.claim().unwrap() = i;
        }
        while slots.retire_top().is_some() {}
        assert!(slots.is_empty());
        assert_eq!(slots.capacity(), 8);
        assert!(slots.retire_top().is_none());
        assert!(slots.top().is_none());
    }

    #[test]
    fn release_returns_to_zero_capacity() {
        let mut slots: SlotVec<u32> = SlotVec::new();
        *slots.claim().unwrap() = 1;
        slots.release();
        assert_eq!(slots.capacity(), 0);
        assert_eq!(slots.len(), 0);
    }
}
