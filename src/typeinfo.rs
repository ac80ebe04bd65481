//! Per-type metadata: object layout, destructor, child-pointer map, and the
//! embedder metadata slot. One `TypeInfo` is lazily created and leaked for
//! every distinct `T` the first time it is needed, capped at
//! `MAX_TYPES_NUMBER` the same way the teacher's `gc_info_table` caps its
//! own index space.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::childmap::ChildMap;
use crate::config::{MAX_TYPES_NUMBER, PAGE_SIZE};
use crate::error::{GcError, Result};
use crate::page::Page;
use crate::trace::Trace;

/// Re-traces a live value of a type whose child map is `unbounded` (see
/// `ChildMap`), rather than trusting a compiled offset table that can't
/// represent children living outside the object's own allocation.
pub type TraceFn = unsafe fn(*const u8, &mut dyn FnMut(*const ()));

unsafe fn trace_dyn_of<T: Trace>(ptr: *const u8, visit: &mut dyn FnMut(*const ())) {
    (*(ptr as *const T)).trace(visit);
}

const WORD_SIZE: usize = std::mem::size_of::<usize>();
/// Usable payload bytes in a small-object page: the first word of every
/// page is reserved for the back-pointer that makes pages self-describing.
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - WORD_SIZE;

pub struct TypeInfo {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub object_size: usize,
    pub align: usize,
    pub slot_count: usize,
    recip_mul: u64,
    pub drop_in_place: unsafe fn(*mut u8),
    pub child_map: ChildMap,
    /// Populated from the type's own `Trace` impl the first time it's
    /// discovered (see `maker::discover_children`), used only as a fallback
    /// when `child_map.is_unbounded()`.
    pub trace_dyn: OnceLock<TraceFn>,
    metadata: AtomicPtr<()>,
    /// Treiber stack (linked through `Page::next_empty`) of pages of this
    /// type that have been fully swept and are waiting to be handed back to
    /// a pool allocator before the collector decides to return them to the
    /// block allocator.
    pub empty_pages: AtomicPtr<Page>,
}

impl TypeInfo {
    pub fn is_large(&self) -> bool {
        self.object_size > PAGE_PAYLOAD_SIZE
    }

    /// Maps a slot byte offset (relative to the page's payload base) to a
    /// slot index in O(1) via a precomputed reciprocal multiply, matching
    /// the technique the design this crate follows uses for the same
    /// purpose, just widened to 64 bits since our offsets can exceed 32.
    pub fn index_of(&self, byte_offset: usize) -> usize {
        let idx = ((byte_offset as u128 * self.recip_mul as u128) >> 64) as usize;
        debug_assert_eq!(idx, byte_offset / self.object_size);
        idx
    }

    /// Records `T`'s `Trace` impl as this type's dynamic fallback. Only
    /// ever called from `maker::discover_children`, which alone knows `T`
    /// and implements `Trace`; later calls for the same type are no-ops.
    pub fn init_trace_dyn<T: Trace + 'static>(&self) {
        let _ = self.trace_dyn.set(trace_dyn_of::<T>);
    }

    pub fn set_metadata(&self, ptr: *mut ()) {
        self.metadata.store(ptr, Ordering::Release);
    }

    pub fn metadata(&self) -> *mut () {
        self.metadata.load(Ordering::Acquire)
    }

    /// Pushes a freshly emptied page onto this type's reuse stack.
    ///
    /// # Safety
    /// `page` must be a live page of this type with no slot still in use.
    pub unsafe fn push_empty_page(&self, page: *mut Page) {
        (*page).on_empty_list.store(true, Ordering::Relaxed);
        loop {
            let head = self.empty_pages.load(Ordering::Relaxed);
            (*page).next_empty.set(head);
            if self
                .empty_pages
                .compare_exchange_weak(head, page, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Pops a page from this type's reuse stack, if any.
    pub fn pop_empty_page(&self) -> Option<*mut Page> {
        loop {
            let head = self.empty_pages.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let next = unsafe { (*head).next_empty.get() };
            if self
                .empty_pages
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                unsafe {
                    (*head).on_empty_list.store(false, Ordering::Relaxed);
                }
                return Some(head);
            }
        }
    }
}

fn reciprocal(object_size: usize) -> u64 {
    (((1u128 << 64) / object_size as u128) + 1) as u64
}

static REGISTRY: OnceLock<Mutex<HashMap<TypeId, &'static TypeInfo>>> = OnceLock::new();
static TYPE_COUNT: AtomicUsize = AtomicUsize::new(0);

fn registry() -> &'static Mutex<HashMap<TypeId, &'static TypeInfo>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

unsafe fn drop_in_place_of<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

/// Returns the (possibly freshly created) `TypeInfo` for `T`, or
/// `GcError::Misuse` if the process has already registered
/// `MAX_TYPES_NUMBER` distinct types.
pub fn type_info<T: 'static>() -> Result<&'static TypeInfo> {
    let id = TypeId::of::<T>();
    let reg = registry();
    {
        let guard = reg.lock().unwrap();
        if let Some(info) = guard.get(&id) {
            return Ok(info);
        }
    }
    let mut guard = reg.lock().unwrap();
    if let Some(info) = guard.get(&id) {
        return Ok(info);
    }
    if TYPE_COUNT.load(Ordering::Relaxed) >= MAX_TYPES_NUMBER {
        return Err(GcError::Misuse("maximum number of registered types exceeded"));
    }
    let object_size = std::mem::size_of::<T>().max(WORD_SIZE);
    let align = std::mem::align_of::<T>().max(WORD_SIZE);
    let slot_count = if object_size > PAGE_PAYLOAD_SIZE {
        1
    } else {
        PAGE_PAYLOAD_SIZE / object_size
    };
    let info: &'static TypeInfo = Box::leak(Box::new(TypeInfo {
        type_id: id,
        type_name: std::any::type_name::<T>(),
        object_size,
        align,
        slot_count,
        recip_mul: reciprocal(object_size),
        drop_in_place: drop_in_place_of::<T>,
        child_map: ChildMap::new(object_size),
        trace_dyn: OnceLock::new(),
        metadata: AtomicPtr::new(std::ptr::null_mut()),
        empty_pages: AtomicPtr::new(std::ptr::null_mut()),
    }));
    guard.insert(id, info);
    TYPE_COUNT.fetch_add(1, Ordering::Relaxed);
    log::trace!("reclaim: registered type {} ({} bytes)", info.type_name, object_size);
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_of_matches_plain_division() {
        let info = type_info::<u64>().unwrap();
        for i in 0..16usize {
            assert_eq!(info.index_of(i * info.object_size), i);
        }
    }

    #[test]
    fn large_objects_get_one_slot() {
        struct Big([u8; PAGE_PAYLOAD_SIZE + 16]);
        let info = type_info::<Big>().unwrap();
        assert!(info.is_large());
        assert_eq!(info.slot_count, 1);
    }
}
