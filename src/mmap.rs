//! Anonymous, page-aligned OS memory mappings backing the block allocator
//! and the large-object allocator.

#[cfg(windows)]
mod _win {
    use core::ptr::null_mut;
    use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
    use winapi::um::winnt::{MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

    pub struct Mmap {
        start: *mut u8,
        size: usize,
    }

    impl Mmap {
        pub fn new(size: usize) -> Option<Self> {
            unsafe {
                let mem = VirtualAlloc(null_mut(), size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE);
                if mem.is_null() {
                    return None;
                }
                Some(Self { start: mem as *mut u8, size })
            }
        }

        pub fn start(&self) -> *mut u8 {
            self.start
        }

        pub fn size(&self) -> usize {
            self.size
        }

        pub fn decommit(&self, addr: *mut u8, len: usize) {
            unsafe {
                VirtualFree(addr.cast(), len, MEM_DECOMMIT);
            }
        }
    }

    impl Drop for Mmap {
        fn drop(&mut self) {
            unsafe {
                VirtualFree(self.start.cast(), 0, MEM_RELEASE);
            }
        }
    }

    unsafe impl Send for Mmap {}
    unsafe impl Sync for Mmap {}
}

#[cfg(unix)]
mod _unix {
    pub struct Mmap {
        start: *mut u8,
        size: usize,
    }

    impl Mmap {
        pub fn new(size: usize) -> Option<Self> {
            unsafe {
                let map = libc::mmap(
                    core::ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                );
                if map == libc::MAP_FAILED {
                    return None;
                }
                Some(Self { start: map as *mut u8, size })
            }
        }

        pub fn start(&self) -> *mut u8 {
            self.start
        }

        pub fn size(&self) -> usize {
            self.size
        }

        pub fn decommit(&self, addr: *mut u8, len: usize) {
            unsafe {
                libc::madvise(addr as *mut _, len, libc::MADV_DONTNEED);
            }
        }
    }

    impl Drop for Mmap {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.start as *mut _, self.size);
            }
        }
    }

    unsafe impl Send for Mmap {}
    unsafe impl Sync for Mmap {}
}

#[cfg(unix)]
pub use _unix::Mmap;
#[cfg(windows)]
pub use _win::Mmap;

/// Maps a region at least `size` bytes long, over-allocated so that a
/// `align`-aligned sub-region of `size` bytes can be carved out of it.
/// Returns the mapping (kept alive for the lifetime of the carved-out
/// region) and the aligned start address.
pub fn map_aligned(size: usize, align: usize) -> Option<(Mmap, *mut u8)> {
    debug_assert!(align.is_power_of_two());
    let map = Mmap::new(size + align)?;
    let start = map.start() as usize;
    let aligned = (start + align - 1) & !(align - 1);
    Some((map, aligned as *mut u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    #[test]
    fn maps_page_aligned_region() {
        let (_map, ptr) = map_aligned(PAGE_SIZE * 2, PAGE_SIZE).expect("mmap failed");
        assert_eq!(ptr as usize % PAGE_SIZE, 0);
    }
}
