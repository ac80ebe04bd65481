//! A page is self-describing: the first machine word of the raw OS page is
//! a back-pointer to its heap-allocated `Page` header, so that given any
//! interior address `p`, `*(p & !(PageSize-1))` yields the page. Everything
//! that needs to go from a managed pointer to its metadata routes through
//! `page_of`.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

use crate::block::Block;
use crate::config::PAGE_SIZE;
use crate::state::{AtomicSlotState, SlotState};
use crate::typeinfo::TypeInfo;

const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// A flat per-slot bit set backing the `reachable` mark bitmap. Only ever
/// touched by the collector thread.
pub struct MarkBitmap {
    words: Box<[AtomicU64]>,
}

impl MarkBitmap {
    fn new(slot_count: usize) -> Self {
        let words = slot_count.div_ceil(64).max(1);
        Self { words: (0..words).map(|_| AtomicU64::new(0)).collect() }
    }

    pub fn set(&self, index: usize) {
        self.words[index / 64].fetch_or(1 << (index % 64), Ordering::Relaxed);
    }

    pub fn clear(&self, index: usize) {
        self.words[index / 64].fetch_and(!(1 << (index % 64)), Ordering::Relaxed);
    }

    pub fn test(&self, index: usize) -> bool {
        self.words[index / 64].load(Ordering::Relaxed) & (1 << (index % 64)) != 0
    }

    pub fn clear_all(&self) {
        for w in self.words.iter() {
            w.store(0, Ordering::Relaxed);
        }
    }

    /// Indices with the bit set, lowest first.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, w)| {
            let mut bits = w.load(Ordering::Relaxed);
            std::iter::from_fn(move || {
                if bits == 0 {
                    None
                } else {
                    let bit = bits.trailing_zeros();
                    bits &= bits - 1;
                    Some(wi * 64 + bit as usize)
                }
            })
        })
    }
}

pub struct Page {
    pub type_info: &'static TypeInfo,
    pub block: *mut Block,
    pub block_page_index: usize,
    pub payload: *mut u8,

    states: Box<[AtomicSlotState]>,
    /// Set by the collector's current-cycle mark pass; cleared at the start
    /// of every cycle.
    pub reachable: MarkBitmap,

    /// Owning thread's page list link (newest-first), published with
    /// `Release` so the collector's registration pass can walk it safely
    /// with `Acquire`.
    pub next: AtomicPtr<Page>,
    /// Collector-owned reuse-stack link; never touched by mutators.
    pub next_empty: Cell<*mut Page>,

    pub object_created: AtomicBool,
    pub state_updated: AtomicBool,
    pub on_empty_list: AtomicBool,
    pub is_used: AtomicBool,

    /// `Some` only for a large object's dedicated page: the leaked mapping
    /// backing it, reclaimed explicitly when the collector sweeps the
    /// object. `None` for ordinary pool pages, which live inside a `Block`.
    pub large_mapping: Option<*mut crate::mmap::Mmap>,
}

impl Page {
    /// Builds a new page header for `type_info`-shaped objects over the raw,
    /// page-aligned memory at `raw_base`, writes the back-pointer into the
    /// page's first word, and returns the heap-allocated header.
    ///
    /// # Safety
    /// `raw_base` must point to a live, exclusively-owned, `PAGE_SIZE`-long,
    /// page-aligned region.
    pub unsafe fn create(
        block: *mut Block,
        block_page_index: usize,
        raw_base: *mut u8,
        type_info: &'static TypeInfo,
    ) -> *mut Page {
        Self::create_with_mapping(block, block_page_index, raw_base, type_info, None)
    }

    /// As `create`, but additionally records the dedicated mapping backing a
    /// large object so it can be unmapped when the object is swept.
    ///
    /// # Safety
    /// Same as `create`.
    pub unsafe fn create_with_mapping(
        block: *mut Block,
        block_page_index: usize,
        raw_base: *mut u8,
        type_info: &'static TypeInfo,
        large_mapping: Option<*mut crate::mmap::Mmap>,
    ) -> *mut Page {
        debug_assert_eq!(raw_base as usize % PAGE_SIZE, 0);
        let slot_count = type_info.slot_count;
        let page = Box::into_raw(Box::new(Page {
            type_info,
            block,
            block_page_index,
            payload: raw_base.add(WORD_SIZE),
            states: (0..slot_count).map(|_| AtomicSlotState::new(SlotState::Unused)).collect(),
            reachable: MarkBitmap::new(slot_count),
            next: AtomicPtr::new(std::ptr::null_mut()),
            next_empty: Cell::new(std::ptr::null_mut()),
            object_created: AtomicBool::new(false),
            state_updated: AtomicBool::new(false),
            on_empty_list: AtomicBool::new(false),
            is_used: AtomicBool::new(true),
            large_mapping,
        }));
        *(raw_base as *mut *mut Page) = page;
        page
    }

    /// Reclaims the header. For an ordinary pool page, the raw page memory
    /// itself is reclaimed by the owning block, separately. For a large
    /// object's dedicated page, its mapping is unmapped here.
    ///
    /// # Safety
    /// `page` must not be referenced again afterward.
    pub unsafe fn destroy(page: *mut Page) {
        let boxed = Box::from_raw(page);
        if let Some(mapping) = boxed.large_mapping {
            drop(Box::from_raw(mapping));
        }
    }

    pub fn slot_count(&self) -> usize {
        self.type_info.slot_count
    }

    pub fn pointer_of(&self, index: usize) -> *mut u8 {
        unsafe { self.payload.add(index * self.type_info.object_size) }
    }

    pub fn index_of(&self, p: *const u8) -> usize {
        let offset = p as usize - self.payload as usize;
        self.type_info.index_of(offset)
    }

    pub fn state_at(&self, index: usize, order: Ordering) -> SlotState {
        self.states[index].load(order)
    }

    pub fn store_state_at(&self, index: usize, state: SlotState, order: Ordering) {
        self.states[index].store(state, order);
    }

    pub fn clear_reachable(&self) {
        self.reachable.clear_all();
    }
}

/// Finds the page containing `p` via its back-pointer word.
///
/// # Safety
/// `p` must point into a live page created by `Page::create`.
pub unsafe fn page_of(p: *const u8) -> *mut Page {
    debug_assert!(!p.is_null());
    let page_base = (p as usize) & !(PAGE_SIZE - 1);
    *(page_base as *const *mut Page)
}

/// # Safety
/// `p` must point into a live page created by `Page::create`.
pub unsafe fn base_address_of(p: *const u8) -> *mut u8 {
    let page = &*page_of(p);
    page.pointer_of(page.index_of(p))
}

/// Sets the slot state for `p`, additionally flagging the page so the
/// collector's registration pass can find freshly touched pages without a
/// full scan.
///
/// # Safety
/// `p` must point into a live page created by `Page::create`.
pub unsafe fn set_state(p: *const u8, state: SlotState) {
    let page = &*page_of(p);
    let index = page.index_of(p);
    match state {
        SlotState::UniqueLock | SlotState::BadAlloc => {
            page.states[index].store(state, Ordering::Relaxed);
            page.object_created.store(true, Ordering::Release);
        }
        SlotState::Reachable | SlotState::ReachableAtomic => {
            page.states[index].store(state, Ordering::Relaxed);
            page.state_updated.store(true, Ordering::Release);
        }
        _ => page.states[index].store(state, Ordering::Release),
    }
}

/// # Safety
/// `p` must point into a live page created by `Page::create`.
pub unsafe fn is_unique(p: *const u8) -> bool {
    let page = &*page_of(p);
    page.states[page.index_of(p)].load(Ordering::Acquire) == SlotState::UniqueLock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::type_info;

    #[test]
    fn back_pointer_round_trips() {
        let info = type_info::<u64>().unwrap();
        let mem = vec![0u8; PAGE_SIZE * 2];
        let base = mem.as_ptr() as usize;
        let aligned = (base + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        unsafe {
            let page = Page::create(std::ptr::null_mut(), 0, aligned as *mut u8, info);
            let slot = (*page).pointer_of(0);
            assert_eq!(page_of(slot), page);
            assert_eq!(base_address_of(slot), slot);
            Page::destroy(page);
        }
    }

    #[test]
    fn set_state_and_is_unique() {
        let info = type_info::<u64>().unwrap();
        let mem = vec![0u8; PAGE_SIZE * 2];
        let base = mem.as_ptr() as usize;
        let aligned = (base + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        unsafe {
            let page = Page::create(std::ptr::null_mut(), 0, aligned as *mut u8, info);
            let slot = (*page).pointer_of(1);
            set_state(slot, SlotState::UniqueLock);
            assert!(is_unique(slot));
            set_state(slot, SlotState::Reachable);
            assert!(!is_unique(slot));
            Page::destroy(page);
        }
    }
}
