//! The weak handle: a best-effort, non-owning observer. Unlike `Unsafe`, it
//! never assumes its referent is still alive and checks the slot's current
//! state on every access; unlike every other handle, it can never itself
//! keep an object reachable. Not part of the core contract (see §3a); it
//! exists purely as connective tissue for code that wants "check without
//! rooting" semantics.

use std::sync::atomic::Ordering;

use crate::handle;
use crate::page;
use crate::state::SlotState;

pub struct Weak<T> {
    ptr: *const T,
}

impl<T> Weak<T> {
    /// # Safety
    /// `ptr` must have been a live managed object's address at some point;
    /// it is not required to still be reachable.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        Weak { ptr }
    }

    pub fn null() -> Self {
        Weak { ptr: std::ptr::null() }
    }

    /// Returns a raw pointer to the referent iff its slot is currently in a
    /// reachable state, without changing that state in any way.
    pub fn upgrade(&self) -> Option<*const T> {
        if self.ptr.is_null() {
            return None;
        }
        unsafe {
            let p = page::page_of(self.ptr as *const u8);
            let index = (*p).index_of(self.ptr as *const u8);
            match (*p).state_at(index, Ordering::Acquire) {
                SlotState::Reachable | SlotState::ReachableAtomic | SlotState::UniqueLock => Some(self.ptr),
                _ => None,
            }
        }
    }

    pub fn is<U: 'static>(&self) -> bool {
        !self.ptr.is_null() && unsafe { handle::is::<U>(self.ptr as *const u8) }
    }
}

impl<T> Clone for Weak<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Weak<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maker::make_tracked;

    #[test]
    fn upgrade_succeeds_while_reachable() {
        let unique = make_tracked(|| 5u64).unwrap();
        let weak = unsafe { Weak::from_raw(unique.get()) };
        let tracked: crate::handle::Tracked<u64> = crate::handle::Tracked::new(unique);
        assert!(weak.upgrade().is_some());
        drop(tracked);
    }

    #[test]
    fn upgrade_fails_for_null() {
        let weak: Weak<u64> = Weak::null();
        assert!(weak.upgrade().is_none());
    }
}
