//! The maker: the only place new managed objects come from. Reserves a
//! slot, runs the caller's constructor under `catch_unwind` (the Rust
//! analogue of "run the constructor, catch the exception"), and on success
//! performs one-shot `Trace`-based child-pointer discovery before handing
//! back ownership as a `Unique<T>`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::collector;
use crate::error::{GcError, Result};
use crate::handle::unique::Unique;
use crate::large;
use crate::mutator;
use crate::page;
use crate::state::SlotState;
use crate::trace::Trace;
use crate::typeinfo::{self, TypeInfo};

fn reserve_slot(type_info: &'static TypeInfo) -> Result<*mut u8> {
    if type_info.is_large() {
        let mutator = mutator::current();
        large::alloc(type_info, &mutator.pages)
    } else {
        mutator::current().alloc(type_info, |pool, pages| pool.alloc(pages))
    }
}

/// Discovers `value`'s managed children the first time this type is
/// constructed, by tracing it once and recording the address of every
/// child field the trace visits.
fn discover_children<T: Trace + 'static>(type_info: &'static TypeInfo, base: *const u8, value: &T) {
    type_info.init_trace_dyn::<T>();
    if type_info.child_map.is_final() {
        return;
    }
    value.trace(&mut |child: *const ()| {
        type_info.child_map.record_child_address(base as *const (), child);
    });
    type_info.child_map.finalize();
}

/// Allocates a new managed `T`, constructed by `ctor`. If `ctor` panics, the
/// slot is marked `BadAlloc` and the panic payload is returned as
/// `GcError::ConstructorThrew` rather than propagated, so one failed
/// allocation can't unwind through the collector's bookkeeping.
pub fn make_tracked<T, F>(ctor: F) -> Result<Unique<T>>
where
    T: Trace + 'static,
    F: FnOnce() -> T,
{
    let type_info = typeinfo::type_info::<T>()?;
    let slot = reserve_slot(type_info)?;
    unsafe {
        page::set_state(slot as *const u8, SlotState::UniqueLock);
    }

    let built: std::result::Result<T, Box<dyn Any + Send + 'static>> = catch_unwind(AssertUnwindSafe(ctor));
    match built {
        Ok(value) => {
            let handle = unsafe {
                std::ptr::write(slot as *mut T, value);
                discover_children(type_info, slot, &*(slot as *const T));
                Unique::from_raw(slot as *mut T)
            };
            collector::note_allocation();
            Ok(handle)
        }
        Err(payload) => {
            unsafe {
                page::set_state(slot as *const u8, SlotState::BadAlloc);
            }
            Err(GcError::ConstructorThrew(payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_construction_yields_usable_handle() {
        let handle = make_tracked(|| 42u64).unwrap();
        assert_eq!(*handle, 42);
    }

    #[test]
    fn panicking_constructor_surfaces_as_constructor_threw() {
        let result: Result<Unique<u64>> = make_tracked(|| panic!("boom"));
        assert!(matches!(result, Err(GcError::ConstructorThrew(_))));
    }

    struct Parent {
        child: crate::handle::Tracked<u64>,
    }

    impl Trace for Parent {
        fn trace(&self, visit: &mut dyn FnMut(*const ())) {
            visit(self.child.as_traced());
        }
    }

    #[test]
    fn discovers_tracked_child_field_on_first_construction() {
        let leaf = make_tracked(|| 7u64).unwrap();
        let parent = make_tracked(|| Parent { child: crate::handle::Tracked::new(leaf) }).unwrap();
        let info = typeinfo::type_info::<Parent>().unwrap();
        assert!(info.child_map.is_final());
        assert_eq!(info.child_map.offsets().len(), 1);
        assert_eq!(*parent.child.get(), 7);
    }
}
