//! Mutator thread records and the global thread registry. Threads are
//! registered lazily, on first touch of any handle, pushed onto a
//! lock-free list (newest-first). The collector's registration pass walks
//! only the nodes pushed since the last cycle, not the whole list, using
//! the last-registered-cursor trick: it remembers the head it stopped at
//! last time and walks `next` until it gets there again.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Mutex;

use crate::page::Page;
use crate::pool::Pool;
use crate::stackroot::StackRootTable;
use crate::typeinfo::TypeInfo;

pub struct Mutator {
    pub pools: Mutex<HashMap<TypeId, Pool>>,
    /// All pages this thread has ever created, newest-first. The collector
    /// walks this during registration; mutators only ever push.
    pub pages: AtomicPtr<Page>,
    pub stack_roots: StackRootTable,
    pub deleted: AtomicBool,
    /// Global registry link, newest-first.
    pub next: AtomicPtr<Mutator>,
}

impl Mutator {
    fn new() -> Box<Mutator> {
        Box::new(Mutator {
            pools: Mutex::new(HashMap::new()),
            pages: AtomicPtr::new(std::ptr::null_mut()),
            stack_roots: StackRootTable::new(),
            deleted: AtomicBool::new(false),
            next: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    pub fn alloc<F>(&self, type_info: &'static TypeInfo, f: F) -> crate::error::Result<*mut u8>
    where
        F: FnOnce(&mut Pool, &AtomicPtr<Page>) -> crate::error::Result<*mut u8>,
    {
        let mut pools = self.pools.lock().unwrap();
        let pool = pools.entry(type_info.type_id).or_insert_with(|| Pool::new(type_info));
        f(pool, &self.pages)
    }
}

static REGISTRY_HEAD: AtomicPtr<Mutator> = AtomicPtr::new(std::ptr::null_mut());

/// Marks the thread's mutator record `deleted` when the thread exits. The
/// record's memory outlives the thread regardless (the registry is an
/// append-only list with no safe way to unlink a node a concurrent
/// collector cycle might be mid-walk through); the collector is expected
/// to drain such records' remaining pool slots once it observes the flag.
struct ExitGuard(*mut Mutator);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        unsafe {
            (*self.0).deleted.store(true, Ordering::Release);
        }
    }
}

thread_local! {
    static CURRENT: *mut Mutator = register_current_thread();
    static EXIT_GUARD: ExitGuard = ExitGuard(CURRENT.with(|&p| p));
}

fn register_current_thread() -> *mut Mutator {
    let boxed = Mutator::new();
    let ptr = Box::into_raw(boxed);
    loop {
        let head = REGISTRY_HEAD.load(Ordering::Relaxed);
        unsafe {
            (*ptr).next.store(head, Ordering::Relaxed);
        }
        if REGISTRY_HEAD.compare_exchange_weak(head, ptr, Ordering::Release, Ordering::Relaxed).is_ok() {
            return ptr;
        }
    }
}

/// Returns the current thread's mutator record, registering it on first
/// call from this thread.
pub fn current() -> &'static Mutator {
    EXIT_GUARD.with(|_| ());
    CURRENT.with(|&ptr| unsafe { &*ptr })
}

/// The head of the global registry as of this call. The collector saves
/// this and, on its next cycle, walks from the *new* head down to this
/// saved value to find only the threads registered since last time.
pub fn registry_head() -> *mut Mutator {
    REGISTRY_HEAD.load(Ordering::Acquire)
}

/// Walks from `from` (exclusive) down to `until` (exclusive), calling `f`
/// on each newly-registered mutator, newest first.
pub fn walk_new(from: *mut Mutator, until: *mut Mutator, mut f: impl FnMut(&Mutator)) {
    let mut cur = from;
    while !cur.is_null() && cur != until {
        let mutator = unsafe { &*cur };
        f(mutator);
        cur = mutator.next.load(Ordering::Acquire);
    }
}
