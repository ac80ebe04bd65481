//! Managed arrays. The design this crate follows hand-picks among several
//! internal object layouts so a small array doesn't pay a full page header's
//! worth of overhead; this crate gets the equivalent benefit for free by
//! storing the elements in an ordinary `Box<[T]>` owned by one managed
//! header object, letting the system allocator pick a tight layout for
//! whatever length is requested instead of reimplementing size classing.
//!
//! The element storage sits outside the managed heap entirely, which the
//! collector has to special-case (see `ChildMap::is_unbounded` and
//! `TypeInfo::trace_dyn`): children inside the boxed slice are found by
//! re-tracing the array each pass instead of the usual compiled offset
//! table. It also means a large array's element storage never goes through
//! the large-object allocator: only the small, fixed-size `Array<T>` header
//! is ever classified by `TypeInfo::is_large`, so the max-object-size
//! boundary this crate otherwise enforces does not reach an array's
//! payload. Giving arrays their own variable-sized slot in the managed heap
//! would close that gap but is a larger redesign of the pool/page size
//! classing than this layout attempts.

use crate::error::Result;
use crate::handle::unique::Unique;
use crate::maker::make_tracked;
use crate::trace::Trace;

/// The managed object backing a tracked array: a length-prefixed boxed
/// slice. `Unique<Array<T>>`/`Tracked<Array<T>>` wrap this directly; callers
/// index through `Deref`/`DerefMut` to `[T]`.
pub struct Array<T> {
    elements: Box<[T]>,
}

impl<T> Array<T> {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl<T> std::ops::Deref for Array<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.elements
    }
}

impl<T> std::ops::DerefMut for Array<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.elements
    }
}

impl<T: Trace> Trace for Array<T> {
    fn trace(&self, visit: &mut dyn FnMut(*const ())) {
        for element in self.elements.iter() {
            element.trace(visit);
        }
    }
}

/// Allocates a managed array of `len` elements, each produced by `build`.
/// A zero-length array allocates nothing at all and returns a null handle
/// (`Unique::is_null`), matching an empty array to "no object" rather than
/// a real, empty header.
pub fn make_tracked_array<T, F>(len: usize, mut build: F) -> Result<Unique<Array<T>>>
where
    T: Trace + 'static,
    F: FnMut(usize) -> T,
{
    if len == 0 {
        return Ok(Unique::null());
    }
    make_tracked(move || Array { elements: (0..len).map(&mut build).collect() })
}

/// Allocates a managed array by cloning `value` into every slot.
pub fn make_tracked_array_filled<T>(len: usize, value: T) -> Result<Unique<Array<T>>>
where
    T: Trace + Clone + 'static,
{
    make_tracked_array(len, move |_| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_array_with_per_index_values() {
        let array = make_tracked_array(4, |i| i as u64 * 10).unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(&array[..], &[0, 10, 20, 30]);
    }

    #[test]
    fn builds_array_with_filled_value() {
        let array = make_tracked_array_filled(3, 7u64).unwrap();
        assert_eq!(&array[..], &[7, 7, 7]);
    }

    #[test]
    fn zero_length_array_allocates_nothing() {
        let array: Unique<Array<u64>> = make_tracked_array(0, |i| i as u64).unwrap();
        assert!(array.is_null());
    }

    struct Node {
        tag: u64,
        next: crate::handle::Tracked<Node>,
    }

    impl Trace for Node {
        fn trace(&self, visit: &mut dyn FnMut(*const ())) {
            visit(self.next.as_traced());
        }
    }

    #[test]
    fn array_of_traced_elements_discovers_children_without_panicking() {
        let array = make_tracked_array(2, |i| {
            let child = make_tracked(|| Node { tag: 99, next: crate::handle::Tracked::null() }).unwrap();
            Node { tag: i as u64, next: crate::handle::Tracked::new(child) }
        })
        .unwrap();
        assert_eq!(array[0].tag, 0);
        assert!(!array[0].next.is_null());
        assert_eq!(unsafe { (*array[0].next.get()).tag }, 99);
    }
}
