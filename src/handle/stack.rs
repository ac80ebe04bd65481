//! The stack handle: a root living in ordinary call-stack storage, found by
//! the collector through the mutator's address-mapped root table rather
//! than by walking frames or cooperating with an unwinder.
//!
//! The design this crate follows constructs these in place at their final
//! stack address (guaranteed by the source language's copy elision rules)
//! and keys the root table directly off that address. Rust does not
//! guarantee a local is never moved after `let x = Stack::new(..)`, so this
//! handle instead owns one leaked, heap-stable cell per instance and keys
//! the table off the cell's address: moving the `Stack<T>` wrapper only
//! copies a pointer to that cell, never the cell itself. The tradeoff is a
//! small heap allocation per root instead of zero; see `DESIGN.md`.

use std::marker::PhantomData;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::handle;
use crate::handle::tracked::Tracked;
use crate::handle::unique::Unique;
use crate::mutator;
use crate::page;
use crate::state::SlotState;

pub struct Stack<T> {
    cell: &'static AtomicPtr<T>,
    _marker: PhantomData<T>,
}

impl<T> Stack<T> {
    fn leak_cell(initial: *mut T) -> &'static AtomicPtr<T> {
        Box::leak(Box::new(AtomicPtr::new(initial)))
    }

    fn register(&self) {
        let addr = self.cell as *const AtomicPtr<T> as usize;
        mutator::current().stack_roots.slot_for(addr).store(self.cell.load(Ordering::Relaxed) as *mut (), Ordering::Release);
    }

    pub fn null() -> Self {
        let cell = Self::leak_cell(null_mut());
        let handle = Stack { cell, _marker: PhantomData };
        handle.register();
        handle
    }

    pub fn new(value: Unique<T>) -> Self {
        let raw = value.into_raw();
        unsafe {
            page::set_state(raw as *const u8, SlotState::Reachable);
        }
        let cell = Self::leak_cell(raw);
        let handle = Stack { cell, _marker: PhantomData };
        handle.register();
        handle
    }

    pub fn from_tracked(field: &Tracked<T>) -> Self {
        let cell = Self::leak_cell(field.get() as *mut T);
        let handle = Stack { cell, _marker: PhantomData };
        handle.register();
        handle
    }

    /// Roots an already-reachable raw pointer directly, with no `Tracked`
    /// field or fresh `Unique` to source it from. The intended use is
    /// pinning the result of `Atomic::load` before it has a chance to be
    /// displaced and swept out from under the caller.
    ///
    /// # Safety
    /// `ptr` must be null or point at a live, constructed managed object.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        let cell = Self::leak_cell(ptr as *mut T);
        let handle = Stack { cell, _marker: PhantomData };
        handle.register();
        handle
    }

    pub fn get(&self) -> *const T {
        self.cell.load(Ordering::Acquire)
    }

    pub fn is_null(&self) -> bool {
        self.get().is_null()
    }

    pub fn store(&self, value: Unique<T>) {
        let raw = value.into_raw();
        unsafe {
            page::set_state(raw as *const u8, SlotState::Reachable);
        }
        self.cell.store(raw, Ordering::Release);
        mutator::current().stack_roots.slot_for(self.cell as *const AtomicPtr<T> as usize).store(raw as *mut (), Ordering::Release);
    }

    pub fn is<U: 'static>(&self) -> bool {
        let p = self.get();
        !p.is_null() && unsafe { handle::is::<U>(p as *const u8) }
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        let addr = self.cell as *const AtomicPtr<T> as usize;
        mutator::current().stack_roots.slot_for(addr).store(null_mut(), Ordering::Release);
        // Reclaim the cell `leak_cell` leaked for this instance. Safe: each
        // `Stack<T>` owns exactly one cell and this runs at most once.
        unsafe {
            drop(Box::from_raw(self.cell as *const AtomicPtr<T> as *mut AtomicPtr<T>));
        }
    }
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Sync> Sync for Stack<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maker::make_tracked;

    #[test]
    fn new_root_is_findable_and_clears_on_drop() {
        let unique = make_tracked(|| 11u64).unwrap();
        let root = Stack::new(unique);
        assert!(!root.is_null());
        assert_eq!(unsafe { *root.get() }, 11);
        let found: Vec<_> = mutator::current().stack_roots.iter_roots().collect();
        assert!(found.contains(&(root.get() as *mut ())));
        drop(root);
    }
}
