//! The object-slot state machine. Every slot in a page carries one byte of
//! state, transitioned with the orderings called for by each edge.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never allocated, or swept and recycled; safe to reserve.
    Unused = 0,
    /// Reserved by an allocating thread; constructor has not yet run.
    Reserved = 1,
    /// Constructor is running and the slot is pinned as an implicit root
    /// until it either publishes as `Reachable`/`ReachableAtomic` or fails.
    UniqueLock = 2,
    /// Live, reachable from a root or another live object.
    Reachable = 3,
    /// Reachable, and additionally the current target of an `Atomic<T>`
    /// slot; subject to the CAS grace-period decay schedule.
    ReachableAtomic = 4,
    /// A `Unique<T>` dropped deterministically; destructor already ran.
    /// Sweep must reclaim the slot without calling the destructor again.
    Destroyed = 5,
    /// The constructor panicked; memory is valid but uninitialized.
    BadAlloc = 6,
    /// Set by the collector on a `Reachable`/`ReachableAtomic` slot found
    /// structurally unreachable, giving a concurrent loader one more cycle
    /// to re-root it before the destructor runs (see `collector.rs`).
    Used = 7,
}

impl SlotState {
    const fn from_u8(v: u8) -> SlotState {
        match v {
            0 => SlotState::Unused,
            1 => SlotState::Reserved,
            2 => SlotState::UniqueLock,
            3 => SlotState::Reachable,
            4 => SlotState::ReachableAtomic,
            5 => SlotState::Destroyed,
            6 => SlotState::BadAlloc,
            7 => SlotState::Used,
            _ => unreachable!("invalid slot state byte"),
        }
    }
}

/// An atomic cell holding one slot's `SlotState`.
#[repr(transparent)]
pub struct AtomicSlotState(AtomicU8);

impl AtomicSlotState {
    pub fn new(s: SlotState) -> Self {
        Self(AtomicU8::new(s as u8))
    }

    pub fn load(&self, order: Ordering) -> SlotState {
        SlotState::from_u8(self.0.load(order))
    }

    pub fn store(&self, s: SlotState, order: Ordering) {
        self.0.store(s as u8, order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_state() {
        for s in [
            SlotState::Unused,
            SlotState::Reserved,
            SlotState::UniqueLock,
            SlotState::Reachable,
            SlotState::ReachableAtomic,
            SlotState::Destroyed,
            SlotState::BadAlloc,
            SlotState::Used,
        ] {
            let cell = AtomicSlotState::new(s);
            assert_eq!(cell.load(Ordering::Acquire), s);
        }
    }
}
