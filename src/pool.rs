//! Per-thread, per-type small-object pool allocator. Refill policy: first
//! try the type's empty-page buffer (pages already shaped for this type
//! that a previous sweep emptied out), then fall back to the block
//! allocator for a raw page and install a new `Page` header on it.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::block_allocator;
use crate::error::Result;
use crate::page::{self, Page};
use crate::state::SlotState;
use crate::typeinfo::TypeInfo;

pub struct Pool {
    type_info: &'static TypeInfo,
    free: Vec<*mut u8>,
}

impl Pool {
    pub fn new(type_info: &'static TypeInfo) -> Self {
        Self { type_info, free: Vec::new() }
    }

    /// Pops a `Reserved` slot ready for construction, publishing any newly
    /// created page into `owner_pages` (the mutator's page list) first.
    pub fn alloc(&mut self, owner_pages: &AtomicPtr<Page>) -> Result<*mut u8> {
        if let Some(slot) = self.free.pop() {
            return Ok(slot);
        }
        self.refill(owner_pages)?;
        Ok(self.free.pop().expect("a refill always yields at least one slot"))
    }

    /// Returns any slots still sitting in this thread's pointer pool back to
    /// `Unused` and clears the pool. Called when the owning mutator thread
    /// exits.
    pub fn drain(&mut self) {
        for slot in self.free.drain(..) {
            unsafe {
                page::set_state(slot, SlotState::Unused);
            }
        }
    }

    fn refill(&mut self, owner_pages: &AtomicPtr<Page>) -> Result<()> {
        let page = match self.type_info.pop_empty_page() {
            Some(page) => page,
            None => self.take_fresh_page(owner_pages)?,
        };
        unsafe {
            let slot_count = (*page).slot_count();
            self.free.reserve(slot_count);
            for index in 0..slot_count {
                let slot = (*page).pointer_of(index);
                (*page).store_state_at(index, SlotState::Reserved, Ordering::Relaxed);
                self.free.push(slot);
            }
        }
        Ok(())
    }

    fn take_fresh_page(&self, owner_pages: &AtomicPtr<Page>) -> Result<*mut Page> {
        let (block, index, raw_base) = block_allocator::global().alloc_page()?;
        let page = unsafe { Page::create(block, index, raw_base, self.type_info) };
        // Publish into the owning thread's page list, newest first, so the
        // collector's registration pass picks it up on the next cycle.
        loop {
            let head = owner_pages.load(Ordering::Relaxed);
            unsafe {
                (*page).next.store(head, Ordering::Relaxed);
            }
            if owner_pages.compare_exchange_weak(head, page, Ordering::Release, Ordering::Relaxed).is_ok() {
                break;
            }
        }
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::type_info;

    #[test]
    fn alloc_hands_out_distinct_reserved_slots() {
        let info = type_info::<u64>().unwrap();
        let mut pool = Pool::new(info);
        let owner_pages = AtomicPtr::new(std::ptr::null_mut());
        let a = pool.alloc(&owner_pages).unwrap();
        let b = pool.alloc(&owner_pages).unwrap();
        assert_ne!(a, b);
        unsafe {
            assert_eq!((*page::page_of(a)).state_at((*page::page_of(a)).index_of(a), Ordering::Acquire), SlotState::Reserved);
        }
    }
}
