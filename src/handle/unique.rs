//! The unique handle: single ownership, created only by the maker, dropped
//! deterministically. Moving one into a `Tracked`/`Stack`/`Atomic` slot
//! consumes it by value and promotes the slot to a shared lifetime; nothing
//! else is allowed to read or write a `Unique` concurrently, so none of its
//! operations need to be atomic.

use std::ops::{Deref, DerefMut};

use crate::error::Result;
use crate::handle;
use crate::page;
use crate::state::SlotState;
use crate::trace::Trace;

/// Owns a managed object exclusively until dropped or moved into a shared
/// slot. Created only by [`crate::maker::make_tracked`].
pub struct Unique<T> {
    ptr: *mut T,
}

impl<T> Unique<T> {
    /// # Safety
    /// `ptr` must be a live slot whose state is `UniqueLock` and whose value
    /// has already been constructed.
    pub(crate) unsafe fn from_raw(ptr: *mut T) -> Self {
        Unique { ptr }
    }

    /// A handle pointing at nothing. Dropping it is a no-op.
    pub(crate) fn null() -> Self {
        Unique { ptr: std::ptr::null_mut() }
    }

    /// Consumes the handle without running its destructor, returning the raw
    /// pointer so a shared handle can take over ownership of the slot.
    pub(crate) fn into_raw(mut self) -> *mut T {
        let ptr = self.ptr;
        self.ptr = std::ptr::null_mut();
        ptr
    }

    pub fn get(&self) -> *const T {
        self.ptr
    }

    pub fn get_mut(&mut self) -> *mut T {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    pub fn is<U: 'static>(&self) -> bool {
        unsafe { handle::is::<U>(self.ptr as *const u8) }
    }

    pub fn type_name(&self) -> &'static str {
        unsafe { handle::type_name_of(self.ptr as *const u8) }
    }

    pub fn object_size(&self) -> usize {
        unsafe { handle::object_size_of(self.ptr as *const u8) }
    }

    pub fn metadata<M>(&self) -> *mut M {
        unsafe { handle::metadata_of::<M>(self.ptr as *const u8) }
    }
}

impl<T: Clone + Trace + 'static> Unique<T> {
    /// Allocates a fresh managed object holding a clone of the pointee.
    pub fn clone(&self) -> Result<Unique<T>> {
        let value = unsafe { (*self.ptr).clone() };
        crate::maker::make_tracked(move || value)
    }
}

impl<T> Deref for Unique<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.ptr }
    }
}

impl<T> DerefMut for Unique<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.ptr }
    }
}

impl<T> Drop for Unique<T> {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        unsafe {
            std::ptr::drop_in_place(self.ptr);
            page::set_state(self.ptr as *const u8, SlotState::Destroyed);
        }
    }
}

unsafe impl<T: Send> Send for Unique<T> {}
unsafe impl<T: Sync> Sync for Unique<T> {}
