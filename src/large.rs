//! Large-object allocator for types whose instances don't fit in a pooled
//! page's slot (`TypeInfo::is_large`). Each large object gets its own
//! dedicated, page-aligned mapping sized to hold exactly one instance; the
//! `Page` header doubles as the control block, same as for pooled objects,
//! so the rest of the collector never needs to know an object is "large".

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::config::PAGE_SIZE;
use crate::error::{GcError, Result};
use crate::mmap::map_aligned;
use crate::page::Page;
use crate::typeinfo::TypeInfo;

const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Maps a dedicated region for one instance of `type_info` and publishes
/// its page into `owner_pages`. Returns the slot pointer ready for the
/// constructor to run.
pub fn alloc(type_info: &'static TypeInfo, owner_pages: &AtomicPtr<Page>) -> Result<*mut u8> {
    debug_assert!(type_info.is_large());
    if let Some(page) = type_info.pop_empty_page() {
        unsafe {
            (*page).store_state_at(0, crate::state::SlotState::Reserved, Ordering::Relaxed);
            return Ok((*page).pointer_of(0));
        }
    }
    let needed = WORD_SIZE + type_info.object_size;
    let size = needed.div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let (mapping, raw_base) = map_aligned(size, PAGE_SIZE).ok_or(GcError::OutOfMemory)?;
    let mapping = Box::into_raw(Box::new(mapping));
    let page = unsafe {
        Page::create_with_mapping(std::ptr::null_mut(), 0, raw_base, type_info, Some(mapping))
    };
    loop {
        let head = owner_pages.load(Ordering::Relaxed);
        unsafe {
            (*page).next.store(head, Ordering::Relaxed);
        }
        if owner_pages.compare_exchange_weak(head, page, Ordering::Release, Ordering::Relaxed).is_ok() {
            break;
        }
    }
    Ok(unsafe { (*page).pointer_of(0) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::type_info;

    #[test]
    fn allocates_dedicated_page_for_oversized_type() {
        struct Big([u8; crate::typeinfo::PAGE_PAYLOAD_SIZE + 1]);
        let info = type_info::<Big>().unwrap();
        let owner_pages = AtomicPtr::new(std::ptr::null_mut());
        let slot = alloc(info, &owner_pages).unwrap();
        assert!(!slot.is_null());
        unsafe {
            assert_eq!(crate::page::base_address_of(slot), slot);
        }
    }
}
