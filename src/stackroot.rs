//! Direct address-mapped stack-root table: the collector finds stack roots
//! by indexing this table with a root's own address rather than walking an
//! intrusive list or cooperating with a JIT/unwinder. One table per mutator
//! thread, sized to the thread's expected stack footprint.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::config::{MAX_STACK_SIZE, PAGE_SIZE};

const POINTERS_PER_TABLE_PAGE: usize = PAGE_SIZE / std::mem::size_of::<*mut ()>();
const TABLE_PAGE_COUNT: usize = MAX_STACK_SIZE / PAGE_SIZE;

type Slot = AtomicPtr<()>;
type TablePage = [Slot; POINTERS_PER_TABLE_PAGE];

/// Per-thread table of root slots, indexed by `(addr / PAGE_SIZE) %
/// TABLE_PAGE_COUNT` then `(addr % PAGE_SIZE) / size_of::<*mut ()>()`.
/// Table pages are allocated lazily so a thread that roots few objects
/// only pays for the tables it touches.
pub struct StackRootTable {
    pages: Box<[AtomicPtr<TablePage>]>,
}

impl StackRootTable {
    pub fn new() -> Self {
        Self { pages: (0..TABLE_PAGE_COUNT).map(|_| AtomicPtr::new(std::ptr::null_mut())).collect() }
    }

    /// Returns the slot that a `Stack` handle living at address `addr`
    /// should register itself into.
    pub fn slot_for(&self, addr: usize) -> &Slot {
        let page_index = (addr / PAGE_SIZE) % TABLE_PAGE_COUNT;
        let offset = (addr % PAGE_SIZE) / std::mem::size_of::<*mut ()>();
        let page = &self.pages[page_index];
        let mut current = page.load(Ordering::Acquire);
        if current.is_null() {
            let fresh = Box::into_raw(Box::new(std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut()))));
            match page.compare_exchange(std::ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => current = fresh,
                Err(existing) => {
                    // Lost the race; drop our spare page and use theirs.
                    unsafe {
                        drop(Box::from_raw(fresh));
                    }
                    current = existing;
                }
            }
        }
        unsafe { &(*current)[offset] }
    }

    /// Iterates every currently-registered (non-null) root slot value.
    /// Used by the collector's stack-scan pass.
    pub fn iter_roots(&self) -> impl Iterator<Item = *mut ()> + '_ {
        self.pages.iter().flat_map(|page| {
            let ptr = page.load(Ordering::Acquire);
            let slice: &[Slot] = if ptr.is_null() { &[] } else { unsafe { &*ptr } };
            slice.iter().filter_map(|slot| {
                let v = slot.load(Ordering::Acquire);
                if v.is_null() {
                    None
                } else {
                    Some(v)
                }
            })
        })
    }
}

impl Default for StackRootTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StackRootTable {
    fn drop(&mut self) {
        for page in self.pages.iter() {
            let ptr = page.load(Ordering::Relaxed);
            if !ptr.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    }
}

unsafe impl Send for StackRootTable {}
unsafe impl Sync for StackRootTable {}
