//! The tracked handle: lives only as a field inside another managed object,
//! and is how that object reaches its managed children. `#[repr(transparent)]`
//! over a single `AtomicPtr<T>` so a `Tracked<T>` field is exactly one
//! pointer-sized word in its owner's layout, which is what lets the
//! child-pointer map record its address and later reread it directly.

use std::marker::PhantomData;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::handle;
use crate::handle::unique::Unique;
use crate::page;
use crate::state::SlotState;

#[repr(transparent)]
pub struct Tracked<T> {
    ptr: AtomicPtr<T>,
    _marker: PhantomData<T>,
}

impl<T> Tracked<T> {
    pub fn null() -> Self {
        Tracked { ptr: AtomicPtr::new(null_mut()), _marker: PhantomData }
    }

    pub fn new(value: Unique<T>) -> Self {
        let raw = value.into_raw();
        unsafe {
            page::set_state(raw as *const u8, SlotState::Reachable);
        }
        Tracked { ptr: AtomicPtr::new(raw), _marker: PhantomData }
    }

    pub fn get(&self) -> *const T {
        self.ptr.load(Ordering::Acquire)
    }

    pub fn is_null(&self) -> bool {
        self.get().is_null()
    }

    pub fn store(&self, value: Unique<T>) {
        let raw = value.into_raw();
        unsafe {
            page::set_state(raw as *const u8, SlotState::Reachable);
        }
        self.ptr.store(raw, Ordering::Release);
    }

    pub fn clear(&self) {
        self.ptr.store(null_mut(), Ordering::Release);
    }

    /// Points this field at an object some other root already keeps
    /// reachable, without taking ownership of it. `store` always demands a
    /// fresh `Unique<T>` because it promotes `UniqueLock` to `Reachable`;
    /// that's wrong for structures where more than one field legitimately
    /// references the same live node (a linked list's `next` aliasing a
    /// node the collection's own root keeps alive), which is what this is
    /// for instead.
    ///
    /// # Safety
    /// `ptr` must be null or point at a live, constructed managed object of
    /// type `T` that remains reachable through some other root for as long
    /// as this field might be read.
    pub unsafe fn store_shared(&self, ptr: *const T) {
        self.ptr.store(ptr as *mut T, Ordering::Release);
    }

    pub fn is<U: 'static>(&self) -> bool {
        let p = self.get();
        !p.is_null() && unsafe { handle::is::<U>(p as *const u8) }
    }

    pub fn type_name(&self) -> Option<&'static str> {
        let p = self.get();
        if p.is_null() {
            None
        } else {
            Some(unsafe { handle::type_name_of(p as *const u8) })
        }
    }

    /// The address the field itself lives at, as a managed-pointer slot for
    /// `Trace` implementations to report. Not the pointee: the child map
    /// records storage locations, not snapshots of their current value.
    pub fn as_traced(&self) -> *const () {
        self as *const Self as *const ()
    }
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Self::null()
    }
}

unsafe impl<T: Send> Send for Tracked<T> {}
unsafe impl<T: Sync> Sync for Tracked<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maker::make_tracked;

    #[test]
    fn store_and_get_round_trip() {
        let unique = make_tracked(|| 7u64).unwrap();
        let field: Tracked<u64> = Tracked::new(unique);
        assert_eq!(unsafe { *field.get() }, 7);
    }

    #[test]
    fn null_by_default() {
        let field: Tracked<u64> = Tracked::null();
        assert!(field.is_null());
    }
}
