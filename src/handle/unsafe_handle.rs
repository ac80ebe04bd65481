//! The unsafe handle: a non-owning, `Copy`able raw view of a managed
//! object, with no rooting obligation of its own. The caller is responsible
//! for keeping the object reachable by some other root for as long as the
//! handle is used; nothing here prevents the collector from reclaiming the
//! referent out from under a dangling one.

use crate::error::{GcError, Result};
use crate::handle;
use crate::page;

pub struct Unsafe<T> {
    ptr: *const T,
}

impl<T> Unsafe<T> {
    /// # Safety
    /// `ptr` must currently point at a live, constructed managed object.
    pub unsafe fn from_raw(ptr: *const T) -> Self {
        Unsafe { ptr }
    }

    pub fn null() -> Self {
        Unsafe { ptr: std::ptr::null() }
    }

    pub fn get(&self) -> *const T {
        self.ptr
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// The base address of the managed object `self` points into, which may
    /// differ from `get()` if this handle was produced by a cast into a
    /// base/derived type at a non-zero offset.
    pub fn get_base(&self) -> *const u8 {
        if self.ptr.is_null() {
            return std::ptr::null();
        }
        unsafe { page::base_address_of(self.ptr as *const u8) }
    }

    pub fn is<U: 'static>(&self) -> bool {
        !self.ptr.is_null() && unsafe { handle::is::<U>(self.ptr as *const u8) }
    }

    /// Checked downcast to a handle of the concrete runtime type.
    pub fn r#as<U: 'static>(&self) -> Result<Unsafe<U>> {
        if self.is::<U>() {
            Ok(Unsafe { ptr: self.ptr as *const U })
        } else {
            Err(GcError::TypeMismatch)
        }
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

impl<T> Clone for Unsafe<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Unsafe<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maker::make_tracked;

    #[test]
    fn downcast_succeeds_for_matching_type() {
        let unique = make_tracked(|| 3u64).unwrap();
        let handle = unsafe { Unsafe::from_raw(unique.get()) };
        assert!(handle.is::<u64>());
        assert!(handle.r#as::<u64>().is_ok());
        assert!(handle.r#as::<String>().is_err());
    }
}
