//! How the collector discovers the managed children of a type.

/// Implemented by every type stored behind a tracked handle. Calls `visit`
/// once for the address of each managed child pointer *field* the value
/// directly owns (a `Tracked<_>`/`Atomic<_>` field's own storage location,
/// not the address it currently points to: the child-pointer map records
/// where to read a live pointer from, not a snapshot of one). Only
/// consulted once per type, the first time a value of that type is
/// constructed, to populate the type's child-pointer map; ordinary marking
/// walks the compiled offset vector instead of calling this again.
pub trait Trace {
    fn trace(&self, visit: &mut dyn FnMut(*const ()));
}

/// Types with no managed children (the common case for leaf data) get this
/// for free instead of writing an empty `trace` body by hand.
#[macro_export]
macro_rules! no_trace {
    ($($t:ty),* $(,)?) => {
        $(
            impl $crate::trace::Trace for $t {
                fn trace(&self, _visit: &mut dyn FnMut(*const ())) {}
            }
        )*
    };
}

no_trace!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String
);
