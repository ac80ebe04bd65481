//! Per-type child-pointer map: which pointer-sized words of an instance
//! hold managed pointers. Populated once, from the first real construction
//! of the type (see `trace.rs` for why this crate uses `Trace` rather than
//! the sentinel-byte trick the design this crate is based on uses), then
//! read-only for the rest of the process.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

const WORD_SIZE: usize = std::mem::size_of::<usize>();

pub struct ChildMap {
    word_count: usize,
    bits: Box<[AtomicU64]>,
    final_flag: AtomicBool,
    /// Set when `record` sees an offset past the object's own size: a child
    /// address that doesn't live inside the object's own allocation (e.g. an
    /// element of a boxed-out array). The offset table can't represent that,
    /// so once this is set the map is never trusted for marking and callers
    /// fall back to re-tracing the object directly every pass.
    unbounded: AtomicBool,
    compiled: OnceLock<Vec<u32>>,
}

impl ChildMap {
    pub fn new(object_size: usize) -> Self {
        let word_count = object_size.div_ceil(WORD_SIZE);
        let words = word_count.div_ceil(64).max(1);
        Self {
            word_count,
            bits: (0..words).map(|_| AtomicU64::new(0)).collect(),
            final_flag: AtomicBool::new(false),
            unbounded: AtomicBool::new(false),
            compiled: OnceLock::new(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.final_flag.load(Ordering::Acquire)
    }

    /// A type whose children can live outside its own object bounds (see
    /// `unbounded` above). `offsets()` is meaningless for such a type;
    /// marking must re-trace the live value instead.
    pub fn is_unbounded(&self) -> bool {
        self.unbounded.load(Ordering::Acquire)
    }

    /// Records that the word at `offset` (in words, from the object base)
    /// holds a managed pointer. Idempotent, monotone: bits only turn on. An
    /// offset past the object's own size can't be a real word index into
    /// `bits`; it marks the map unbounded instead of indexing out of range.
    pub fn record(&self, offset: usize) {
        if offset >= self.word_count {
            self.unbounded.store(true, Ordering::Release);
            return;
        }
        let word = offset / 64;
        let bit = offset % 64;
        self.bits[word].fetch_or(1 << bit, Ordering::Relaxed);
    }

    /// Finalizes the map. Once final, the offset set never changes again.
    pub fn finalize(&self) {
        self.final_flag.store(true, Ordering::Release);
    }

    /// Records a child address relative to `base`, used while discovering
    /// a type's layout via `Trace` on its first constructed instance.
    pub fn record_child_address(&self, base: *const (), child: *const ()) {
        let delta = (child as usize).wrapping_sub(base as usize);
        debug_assert_eq!(delta % WORD_SIZE, 0, "child pointer is not word-aligned in its owner");
        self.record(delta / WORD_SIZE);
    }

    /// Offsets (in words) of every managed child pointer, compiled once on
    /// first access after finalization.
    pub fn offsets(&self) -> &[u32] {
        debug_assert!(self.is_final());
        self.compiled.get_or_init(|| {
            let mut out = Vec::new();
            for (wi, word) in self.bits.iter().enumerate() {
                let mut bits = word.load(Ordering::Acquire);
                while bits != 0 {
                    let bit = bits.trailing_zeros();
                    out.push((wi * 64 + bit as usize) as u32);
                    bits &= bits - 1;
                }
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_compiles_offsets() {
        let map = ChildMap::new(64);
        map.record(0);
        map.record(3);
        map.finalize();
        assert_eq!(map.offsets(), &[0, 3]);
    }

    #[test]
    fn offset_past_object_bounds_marks_unbounded_instead_of_panicking() {
        let map = ChildMap::new(16);
        map.record(0);
        map.record(500);
        map.finalize();
        assert!(map.is_unbounded());
        assert_eq!(map.offsets(), &[0]);
    }

    #[test]
    fn record_child_address_computes_word_offset() {
        let map = ChildMap::new(64);
        let base = 0x1000usize as *const ();
        let child = 0x1010usize as *const (); // 16 bytes in => word offset 2
        map.record_child_address(base, child);
        map.finalize();
        assert_eq!(map.offsets(), &[2]);
    }
}
