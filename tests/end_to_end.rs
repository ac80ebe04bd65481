//! End-to-end scenarios exercising only the public API, the way a consumer
//! of this crate would. The collector is a single process-wide singleton,
//! so every test takes `LOCK` first to keep the six scenarios from treading
//! on each other's live-object counts.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reclaim::typeinfo::PAGE_PAYLOAD_SIZE;
use reclaim::{force_collect, last_living_objects_number, living_objects, make_tracked, no_trace, Atomic, Stack, Trace, Tracked};

static LOCK: Mutex<()> = Mutex::new(());

/// Raw pointers aren't `Send`; this carries one across a thread boundary for
/// tests where the pointee is kept alive some other way for as long as the
/// thread holding the copy runs.
#[derive(Clone, Copy)]
struct SendPtr<T>(*const T);
unsafe impl<T> Send for SendPtr<T> {}

// --- Scenario 1: cycle collection -----------------------------------------

struct CycleNode {
    next: Tracked<CycleNode>,
}

static CYCLE_DROPS: AtomicUsize = AtomicUsize::new(0);

impl Trace for CycleNode {
    fn trace(&self, visit: &mut dyn FnMut(*const ())) {
        visit(self.next.as_traced());
    }
}

impl Drop for CycleNode {
    fn drop(&mut self) {
        CYCLE_DROPS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn three_node_cycle_is_fully_collected_once_unrooted() {
    let _guard = LOCK.lock().unwrap();
    force_collect(true);
    let before = CYCLE_DROPS.load(Ordering::SeqCst);

    let c = make_tracked(|| CycleNode { next: Tracked::null() }).unwrap();
    let c_ptr = c.get();
    let b = make_tracked(|| CycleNode { next: Tracked::null() }).unwrap();
    b.next.store(c);
    let b_ptr = b.get();
    let a = make_tracked(|| CycleNode { next: Tracked::null() }).unwrap();
    a.next.store(b);
    let a_ptr = a.get();
    // Close the cycle: a -> b -> c -> a. `a` is consumed into `b.next` above
    // and `b`/`c` likewise, so nothing outside the cycle roots any of them.
    unsafe {
        (*c_ptr).next.store(a);
    }

    // Per the crate's own reclaim bound, a fully-closed unrooted cycle is
    // gone within three completed cycles of the collector noticing it.
    for _ in 0..3 {
        if CYCLE_DROPS.load(Ordering::SeqCst) - before == 3 {
            break;
        }
        force_collect(true);
    }

    assert_eq!(CYCLE_DROPS.load(Ordering::SeqCst) - before, 3, "all three cycle members should be destructed exactly once");

    for ptr in [a_ptr, b_ptr, c_ptr] {
        unsafe {
            let page = reclaim::page::page_of(ptr as *const u8);
            let index = (*page).index_of(ptr as *const u8);
            assert_eq!((*page).state_at(index, Ordering::Acquire), reclaim::state::SlotState::Unused);
        }
    }
}

// --- Scenario 2: concurrent lock-free stack --------------------------------

struct StackNode {
    value: i64,
    next: Tracked<StackNode>,
}

impl Trace for StackNode {
    fn trace(&self, visit: &mut dyn FnMut(*const ())) {
        visit(self.next.as_traced());
    }
}

struct TreiberStack {
    head: Atomic<StackNode>,
}

impl Trace for TreiberStack {
    fn trace(&self, visit: &mut dyn FnMut(*const ())) {
        visit(self.head.as_traced());
    }
}

impl TreiberStack {
    fn push(&self, value: i64) {
        loop {
            let old_top = self.head.load();
            let node = make_tracked(|| StackNode { value, next: Tracked::null() }).unwrap();
            unsafe {
                node.next.store_shared(old_top);
            }
            if self.head.compare_exchange(old_top, node).is_ok() {
                return;
            }
            // Rejected node's `Unique` drops here, running its destructor
            // immediately rather than waiting on a sweep.
        }
    }

    fn pop(&self) -> Option<i64> {
        loop {
            let top = self.head.load();
            if top.is_null() {
                return None;
            }
            let (value, next) = unsafe { ((*top).value, (*top).next.get()) };
            if unsafe { self.head.compare_exchange_shared(top, next) }.is_ok() {
                return Some(value);
            }
        }
    }
}

#[test]
fn concurrent_treiber_stack_balances_pushes_and_pops() {
    let _guard = LOCK.lock().unwrap();
    force_collect(true);
    let baseline = last_living_objects_number();

    let stack = make_tracked(|| TreiberStack { head: Atomic::null() }).unwrap();
    let root = Stack::new(stack);
    let stack_ptr = SendPtr(root.get());

    // Scaled down from a spec-scale million per thread to keep this test fast.
    const PER_THREAD: i64 = 20_000;
    const TOTAL: i64 = 2 * PER_THREAD;
    let total_popped = AtomicI64::new(0);

    let (pushed_sum, popped_sum) = thread::scope(|scope| {
        let pushers: Vec<_> = (0..2i64)
            .map(|t| {
                scope.spawn(move || {
                    let s = unsafe { &*stack_ptr.0 };
                    let mut sum = 0i64;
                    for i in 0..PER_THREAD {
                        let v = t * PER_THREAD + i;
                        s.push(v);
                        sum += v;
                    }
                    sum
                })
            })
            .collect();

        let total_popped_ref = &total_popped;
        let poppers: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(move || {
                    let s = unsafe { &*stack_ptr.0 };
                    let mut sum = 0i64;
                    loop {
                        if total_popped_ref.load(Ordering::Acquire) >= TOTAL {
                            break;
                        }
                        if let Some(v) = s.pop() {
                            sum += v;
                            total_popped_ref.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                    sum
                })
            })
            .collect();

        let pushed_sum: i64 = pushers.into_iter().map(|h| h.join().unwrap()).sum();
        let popped_sum: i64 = poppers.into_iter().map(|h| h.join().unwrap()).sum();
        (pushed_sum, popped_sum)
    });

    assert_eq!(pushed_sum, popped_sum);

    for _ in 0..4 {
        if last_living_objects_number() == baseline + 1 {
            break;
        }
        force_collect(true);
    }
    assert_eq!(last_living_objects_number(), baseline + 1, "only the stack header itself should remain live");

    drop(root);
    for _ in 0..4 {
        if last_living_objects_number() == baseline {
            break;
        }
        force_collect(true);
    }
    assert_eq!(last_living_objects_number(), baseline);
}

// --- Scenario 3: atomic handoff ---------------------------------------------

struct Payload {
    tag: u64,
}
no_trace!(Payload);

#[test]
fn atomic_handoff_protects_a_concurrently_loaded_value() {
    let _guard = LOCK.lock().unwrap();
    force_collect(true);

    // Not itself inside any managed object: the payloads it holds survive
    // purely on `Reachable`/`ReachableAtomic` state, the mechanism under
    // test, rather than by being structurally reachable from a root.
    let shared = Arc::new(Atomic::<Payload>::null());
    let stop = Arc::new(AtomicBool::new(false));
    let observed_bad_tag = Arc::new(AtomicBool::new(false));

    let writer = {
        let shared = shared.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut tag = 0u64;
            while !stop.load(Ordering::Acquire) {
                let fresh = make_tracked(move || Payload { tag }).unwrap();
                shared.store(fresh);
                tag += 1;
                force_collect(false);
            }
        })
    };

    let reader = {
        let shared = shared.clone();
        let stop = stop.clone();
        let observed_bad_tag = observed_bad_tag.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                let loaded = shared.load();
                if loaded.is_null() {
                    continue;
                }
                // `load()` already promoted `loaded`'s state; rooting it
                // here keeps it alive for the whole hold even if the
                // collector sweeps through again while we sleep.
                let handle = unsafe { Stack::from_raw(loaded) };
                thread::sleep(Duration::from_millis(1));
                let tag = unsafe { (*handle.get()).tag };
                if tag > u64::from(u32::MAX) {
                    // `tag` can never legitimately reach this; a wild read
                    // off freed memory is the only way it would.
                    observed_bad_tag.store(true, Ordering::Release);
                }
                drop(handle);
            }
        })
    };

    thread::sleep(Duration::from_millis(200));
    stop.store(true, Ordering::Release);
    writer.join().unwrap();
    reader.join().unwrap();

    assert!(!observed_bad_tag.load(Ordering::Acquire), "reader observed a value consistent with a freed slot");

    // Drain whatever the handoff left parked in `shared`.
    let last = shared.load();
    if !last.is_null() {
        unsafe {
            shared.compare_exchange_shared(last, std::ptr::null()).ok();
        }
    }
    for _ in 0..5 {
        force_collect(true);
    }
}

// --- Scenario 4: large object -----------------------------------------------

struct Blob([u8; PAGE_PAYLOAD_SIZE + 1]);
no_trace!(Blob);

#[test]
fn oversized_object_takes_the_large_object_path_and_is_reclaimed() {
    let _guard = LOCK.lock().unwrap();
    force_collect(true);
    let baseline = last_living_objects_number();

    assert!(std::mem::size_of::<Blob>() > PAGE_PAYLOAD_SIZE);
    let blob = make_tracked(|| Blob([7u8; PAGE_PAYLOAD_SIZE + 1])).unwrap();
    let ptr = blob.get();
    assert_eq!(unsafe { (*ptr).0[0] }, 7);
    unsafe {
        let page = reclaim::page::page_of(ptr as *const u8);
        assert!((*page).type_info.is_large());
    }

    let root = Stack::new(blob);
    assert_eq!(unsafe { (*root.get()).0[0] }, 7);
    force_collect(true);
    assert_eq!(last_living_objects_number(), baseline + 1);

    drop(root);
    for _ in 0..4 {
        if last_living_objects_number() == baseline {
            break;
        }
        force_collect(true);
    }
    assert_eq!(last_living_objects_number(), baseline);
}

// --- Scenario 5: unique drop ordering ----------------------------------------

struct DropOrder {
    tag: &'static str,
}

static DROP_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

impl Drop for DropOrder {
    fn drop(&mut self) {
        DROP_LOG.lock().unwrap().push(self.tag);
    }
}
no_trace!(DropOrder);

#[test]
fn unique_drop_runs_destructor_once_and_sweep_does_not_repeat_it() {
    let _guard = LOCK.lock().unwrap();
    DROP_LOG.lock().unwrap().clear();

    let value = make_tracked(|| DropOrder { tag: "x" }).unwrap();
    let ptr = value.get();
    drop(value); // destructor runs synchronously here.

    assert_eq!(*DROP_LOG.lock().unwrap(), vec!["x"]);
    unsafe {
        let page = reclaim::page::page_of(ptr as *const u8);
        let index = (*page).index_of(ptr as *const u8);
        assert_eq!((*page).state_at(index, Ordering::Acquire), reclaim::state::SlotState::Destroyed);
    }

    force_collect(true);
    assert_eq!(DROP_LOG.lock().unwrap().len(), 1, "sweep must not run the destructor a second time");
    unsafe {
        let page = reclaim::page::page_of(ptr as *const u8);
        let index = (*page).index_of(ptr as *const u8);
        assert_eq!((*page).state_at(index, Ordering::Acquire), reclaim::state::SlotState::Unused);
    }
}

// --- Scenario 6: live-objects snapshot ---------------------------------------

#[test]
fn living_objects_snapshot_matches_last_count_and_pauses_the_collector() {
    let _guard = LOCK.lock().unwrap();
    force_collect(true);
    let baseline = last_living_objects_number();

    const N: usize = 5;
    let roots: Vec<_> = (0..N)
        .map(|i| Stack::new(make_tracked(move || i as u64).unwrap()))
        .collect();

    // Let a completed sweep count the new roots before snapshotting, so the
    // snapshot and the last-completed-sweep count are taken over the same
    // live set.
    force_collect(true);
    assert_eq!(last_living_objects_number(), baseline + N);

    let (guard, snapshot) = living_objects();
    assert_eq!(snapshot.len(), last_living_objects_number());
    assert_eq!(snapshot.len(), baseline + N);

    // The collector is paused for the guard's lifetime: a force_collect
    // during the pause must report the pause rather than block.
    assert!(!force_collect(true));

    drop(guard);
    drop(roots);
    for _ in 0..4 {
        if last_living_objects_number() == baseline {
            break;
        }
        force_collect(true);
    }
    assert_eq!(last_living_objects_number(), baseline);
}
