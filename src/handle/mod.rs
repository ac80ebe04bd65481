//! The handle family: every handle wraps a possibly-null pointer into the
//! managed heap and shares the same small set of capabilities (load,
//! store, read-as-raw, cast, clone, type-inspect), but each variant alone
//! enforces the invariant that gives it its name. Matching the design
//! note's preference for a policy-tagged pointer over virtual dispatch,
//! these are plain structs, not a trait object hierarchy.

pub mod atomic;
pub mod stack;
pub mod tracked;
pub mod unique;
pub mod unsafe_handle;
pub mod weak;

pub use atomic::Atomic;
pub use stack::Stack;
pub use tracked::Tracked;
pub use unique::Unique;
pub use unsafe_handle::Unsafe;
pub use weak::Weak;

use std::any::TypeId;

use crate::page;

/// # Safety
/// `ptr` must point at a live managed object's base address.
pub(crate) unsafe fn is<U: 'static>(ptr: *const u8) -> bool {
    (*page::page_of(ptr)).type_info.type_id == TypeId::of::<U>()
}

/// # Safety
/// `ptr` must point at a live managed object's base address.
pub(crate) unsafe fn type_name_of(ptr: *const u8) -> &'static str {
    (*page::page_of(ptr)).type_info.type_name
}

/// # Safety
/// `ptr` must point at a live managed object's base address.
pub(crate) unsafe fn object_size_of(ptr: *const u8) -> usize {
    (*page::page_of(ptr)).type_info.object_size
}

/// # Safety
/// `ptr` must point at a live managed object's base address.
pub(crate) unsafe fn metadata_of<M>(ptr: *const u8) -> *mut M {
    (*page::page_of(ptr)).type_info.metadata() as *mut M
}
