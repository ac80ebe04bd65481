//! Global block allocator: a bump-pointer carve-out of a large mmap arena,
//! backed by a lock-free Treiber-stack free list of returned blocks. New
//! arenas are mapped on demand so the heap grows rather than being bounded
//! up front.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use parking_lot::Mutex as SpinMutex;

use crate::block::Block;
use crate::config::BLOCK_SIZE;
use crate::error::{GcError, Result};
use crate::mmap::{map_aligned, Mmap};

struct Arena {
    map: Mmap,
    base: *mut u8,
    size: usize,
}

/// Grown in chunks of this many blocks whenever the bump pointer runs out
/// of room in every existing arena.
const ARENA_BLOCK_COUNT: usize = 64;

pub struct BlockAllocator {
    free_list: AtomicPtr<Block>,
    arenas: Mutex<Vec<Arena>>,
    bump: AtomicUsize,
    bump_end: AtomicUsize,
    grow_lock: Mutex<()>,
    /// The block pages are currently being carved out of, shared by every
    /// thread's pool allocators. Guarded by a raw spinlock rather than the
    /// heavier `std::sync::Mutex` since it is held only for the handful of
    /// instructions needed to find or reserve a page.
    current_block: SpinMutex<*mut Block>,
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self {
            free_list: AtomicPtr::new(std::ptr::null_mut()),
            arenas: Mutex::new(Vec::new()),
            bump: AtomicUsize::new(0),
            bump_end: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
            current_block: SpinMutex::new(std::ptr::null_mut()),
        }
    }

    /// Returns a free, page-aligned page: `(block, page_index, raw_base)`.
    /// Prefers carving another page out of the block currently being filled
    /// before reaching for a brand new block.
    pub fn alloc_page(&self) -> Result<(*mut Block, usize, *mut u8)> {
        let mut guard = self.current_block.lock();
        loop {
            if !guard.is_null() {
                if let Some(index) = unsafe { Block::alloc_page(*guard) } {
                    let base = unsafe { Block::page_ptr(*guard, index) };
                    return Ok((*guard, index, base));
                }
            }
            *guard = self.get_block()?;
        }
    }

    /// Returns page `index` of `block` to the block's own free mask. If the
    /// whole block became empty as a result, its physical pages are
    /// decommitted and it's handed back to the block allocator's free list.
    pub fn free_page(&self, block: *mut Block, index: usize) {
        let became_empty = unsafe { Block::free_page(block, index) };
        if became_empty {
            let mut guard = self.current_block.lock();
            if *guard == block {
                *guard = std::ptr::null_mut();
            }
            drop(guard);
            self.return_block(block);
        }
    }

    /// Hands out a freshly initialized block, reusing a returned one if the
    /// free list is non-empty.
    pub fn get_block(&self) -> Result<*mut Block> {
        if let Some(block) = self.pop_free() {
            unsafe {
                Block::init(block as *mut u8);
            }
            return Ok(block);
        }
        self.carve_block()
    }

    pub fn return_block(&self, block: *mut Block) {
        self.decommit_block(block);
        loop {
            let head = self.free_list.load(Ordering::Relaxed);
            Block::next_free_link(block).store(head, Ordering::Relaxed);
            if self
                .free_list
                .compare_exchange_weak(head, block, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Tells the OS the block's physical pages can be dropped before the
    /// block goes on the free list.
    fn decommit_block(&self, block: *mut Block) {
        let addr = block as usize;
        let arenas = self.arenas.lock().unwrap();
        for arena in arenas.iter() {
            let start = arena.base as usize;
            if addr >= start && addr < start + arena.size {
                arena.map.decommit(block as *mut u8, BLOCK_SIZE);
                return;
            }
        }
    }

    fn pop_free(&self) -> Option<*mut Block> {
        loop {
            let head = self.free_list.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let next = Block::next_free_link(head).load(Ordering::Relaxed);
            if self
                .free_list
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(head);
            }
        }
    }

    fn carve_block(&self) -> Result<*mut Block> {
        loop {
            let old = self.bump.load(Ordering::Relaxed);
            let end = self.bump_end.load(Ordering::Relaxed);
            if old + BLOCK_SIZE <= end {
                if self
                    .bump
                    .compare_exchange_weak(old, old + BLOCK_SIZE, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return Ok(unsafe { Block::init(old as *mut u8) });
                }
                continue;
            }
            self.grow()?;
        }
    }

    fn grow(&self) -> Result<()> {
        let _guard = self.grow_lock.lock().unwrap();
        // Another thread may have already grown the arena while we waited.
        if self.bump.load(Ordering::Relaxed) + BLOCK_SIZE <= self.bump_end.load(Ordering::Relaxed) {
            return Ok(());
        }
        let arena_size = BLOCK_SIZE * ARENA_BLOCK_COUNT;
        let (map, base) = map_aligned(arena_size, BLOCK_SIZE).ok_or(GcError::OutOfMemory)?;
        let base_addr = base as usize;
        self.arenas.lock().unwrap().push(Arena { map, base, size: arena_size });
        self.bump.store(base_addr, Ordering::Relaxed);
        self.bump_end.store(base_addr + arena_size, Ordering::Release);
        log::trace!("reclaim: grew block arena by {ARENA_BLOCK_COUNT} blocks");
        Ok(())
    }
}

impl Default for BlockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<BlockAllocator> = OnceLock::new();

/// The process-wide block allocator. All pool and large-object allocators
/// share it.
pub fn global() -> &'static BlockAllocator {
    GLOBAL.get_or_init(BlockAllocator::new)
}

unsafe impl Send for BlockAllocator {}
unsafe impl Sync for BlockAllocator {}
