//! The atomic handle: supports concurrent load/store/CAS from multiple
//! mutator threads. `load()` promotes whatever it reads to
//! `ReachableAtomic` before returning it, and `store`/`swap`/
//! `compare_exchange` promote the value they displace the same way before
//! overwriting the slot, so a value a concurrent thread just read (or is
//! about to stop pointing at) survives at least one more sweep even if
//! nothing else references it by the time the collector marks. A value
//! being newly installed is instead promoted straight to plain `Reachable`:
//! it has never been exposed to a racing loader yet, so it needs no extra
//! grace of its own. `compare_exchange` additionally parks the slot's
//! current value in a thread-local cell fed into the owning mutator's
//! stack-root table for the span of the CAS attempt, the same way a
//! `Stack` handle roots a value, since a plain local variable holding that
//! read isn't otherwise a root.

use std::marker::PhantomData;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::handle;
use crate::handle::unique::Unique;
use crate::mutator;
use crate::page;
use crate::state::SlotState;

thread_local! {
    static PROTECT_CELL: &'static AtomicPtr<()> = Box::leak(Box::new(AtomicPtr::new(null_mut())));
}

/// Roots `ptr` in this thread's stack-root table for the duration of an
/// atomic operation on it.
fn protect_value(ptr: *mut ()) {
    PROTECT_CELL.with(|cell| {
        cell.store(ptr, Ordering::Release);
        let addr = *cell as *const AtomicPtr<()> as usize;
        mutator::current().stack_roots.slot_for(addr).store(ptr, Ordering::Release);
    });
}

fn unprotect_value() {
    PROTECT_CELL.with(|cell| {
        let addr = *cell as *const AtomicPtr<()> as usize;
        mutator::current().stack_roots.slot_for(addr).store(null_mut(), Ordering::Release);
        cell.store(null_mut(), Ordering::Release);
    });
}

#[repr(transparent)]
pub struct Atomic<T> {
    ptr: AtomicPtr<T>,
    _marker: PhantomData<T>,
}

impl<T> Atomic<T> {
    pub fn null() -> Self {
        Atomic { ptr: AtomicPtr::new(null_mut()), _marker: PhantomData }
    }

    pub fn new(value: Unique<T>) -> Self {
        let raw = value.into_raw();
        unsafe {
            page::set_state(raw as *const u8, SlotState::Reachable);
        }
        Atomic { ptr: AtomicPtr::new(raw), _marker: PhantomData }
    }

    pub fn load(&self) -> *const T {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            unsafe {
                page::set_state(p as *const u8, SlotState::ReachableAtomic);
            }
        }
        p
    }

    pub fn store(&self, value: Unique<T>) {
        let raw = value.into_raw();
        let old = self.ptr.load(Ordering::Acquire);
        if !old.is_null() {
            unsafe {
                page::set_state(old as *const u8, SlotState::ReachableAtomic);
            }
        }
        self.ptr.store(raw, Ordering::Release);
        if !raw.is_null() {
            unsafe {
                page::set_state(raw as *const u8, SlotState::Reachable);
            }
        }
    }

    pub fn swap(&self, value: Unique<T>) -> *const T {
        let raw = value.into_raw();
        let previous = self.ptr.swap(raw, Ordering::AcqRel);
        if !previous.is_null() {
            unsafe {
                page::set_state(previous as *const u8, SlotState::ReachableAtomic);
            }
        }
        if !raw.is_null() {
            unsafe {
                page::set_state(raw as *const u8, SlotState::Reachable);
            }
        }
        previous
    }

    /// Replaces the current target with `new` iff it still equals
    /// `expected`, returning `Ok(previous)` on success or `Err(new)` handing
    /// the caller's `Unique` back on failure.
    pub fn compare_exchange(&self, expected: *const T, new: Unique<T>) -> std::result::Result<*const T, Unique<T>> {
        let raw = new.into_raw();
        let current = self.ptr.load(Ordering::Acquire);
        if !current.is_null() {
            protect_value(current as *mut ());
        }
        let result = self.ptr.compare_exchange(expected as *mut T, raw, Ordering::AcqRel, Ordering::Acquire);
        let outcome = match result {
            Ok(previous) => {
                if !previous.is_null() {
                    unsafe {
                        page::set_state(previous as *const u8, SlotState::ReachableAtomic);
                    }
                }
                unsafe {
                    page::set_state(raw as *const u8, SlotState::Reachable);
                }
                Ok(previous)
            }
            Err(_) => Err(unsafe { Unique::from_raw(raw) }),
        };
        if !current.is_null() {
            unprotect_value();
        }
        outcome
    }

    /// As `compare_exchange`, but `new` is an already-reachable raw pointer
    /// rather than a freshly owned `Unique<T>`: retargets the slot without
    /// requiring exclusive ownership of the value being installed. Used to
    /// advance a lock-free structure's root to a node some other tracked
    /// field already keeps alive (a stack's head moving to the popped
    /// node's successor). The displaced value is promoted to
    /// `ReachableAtomic` on success, same as `compare_exchange`; `new` is
    /// left untouched since its reachability is already someone else's
    /// responsibility.
    ///
    /// # Safety
    /// `new` must be null or point at a live, constructed managed object
    /// that remains reachable through some other root independent of this
    /// slot.
    pub unsafe fn compare_exchange_shared(&self, expected: *const T, new: *const T) -> std::result::Result<*const T, *const T> {
        let result = self.ptr.compare_exchange(expected as *mut T, new as *mut T, Ordering::AcqRel, Ordering::Acquire);
        if let Ok(previous) = result {
            if !previous.is_null() {
                page::set_state(previous as *const u8, SlotState::ReachableAtomic);
            }
        }
        result
    }

    pub fn is<U: 'static>(&self) -> bool {
        let p = self.load();
        !p.is_null() && unsafe { handle::is::<U>(p as *const u8) }
    }

    /// The address the field itself lives at, as a managed-pointer slot for
    /// `Trace` implementations to report. Not the pointee, same as
    /// `Tracked::as_traced`.
    pub fn as_traced(&self) -> *const () {
        self as *const Self as *const ()
    }
}

unsafe impl<T: Send> Send for Atomic<T> {}
unsafe impl<T: Sync> Sync for Atomic<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maker::make_tracked;

    #[test]
    fn store_then_load_round_trips() {
        let field: Atomic<u64> = Atomic::null();
        let unique = make_tracked(|| 9u64).unwrap();
        field.store(unique);
        assert_eq!(unsafe { *field.load() }, 9);
    }

    #[test]
    fn compare_exchange_succeeds_when_expected_matches() {
        let first = make_tracked(|| 1u64).unwrap();
        let field = Atomic::new(first);
        let current = field.load();
        let second = make_tracked(|| 2u64).unwrap();
        let result = field.compare_exchange(current, second);
        assert!(result.is_ok());
        assert_eq!(unsafe { *field.load() }, 2);
    }
}
