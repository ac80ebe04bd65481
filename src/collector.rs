//! The collector: one background thread per process, running a loop that
//! never stops the world and never polls mutators for a safepoint. Each
//! cycle: register newly-seen threads and pages, scan roots, trace the
//! reachable graph out to a fixpoint (rechecking anything a mutator
//! published mid-scan), sweep whatever didn't get marked, and recycle
//! emptied pages. Structure follows the source design's main loop, just
//! spelled with a `Mutex`-guarded cycle instead of the original's direct
//! field access, since only one thread here ever runs a cycle at a time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config;
use crate::mutator::{self, Mutator};
use crate::page::{self, Page};
use crate::state::SlotState;

const WORD_SIZE: usize = std::mem::size_of::<usize>();

struct Inner {
    /// Every page the collector has ever discovered, in discovery order.
    /// Append-only: a page is never unlinked once swept, only recycled via
    /// its type's empty-page stack.
    pages: Vec<*mut Page>,
    /// Registry head as of the last `register_threads` pass, the
    /// last-registered-cursor used to find only newly registered threads.
    registry_cursor: *mut Mutator,
    /// Per-mutator last-seen page-list head, same trick at the page level.
    page_cursors: HashMap<usize, *mut Page>,
    /// Mutator addresses whose pool state has already been drained after
    /// their thread exited, so a registry walk doesn't redo the work every
    /// cycle for the rest of the process's life.
    drained: std::collections::HashSet<usize>,
    cycle: u64,
    last_living: usize,
    live_snapshot: Option<Vec<*const ()>>,
    terminating: bool,
    terminated: bool,
    idle_cycles_since_quiet: u32,
}

pub struct Collector {
    inner: Mutex<Inner>,
    cycle_done: Condvar,
    paused: AtomicBool,
    pause_release: Condvar,
    force_requested: AtomicBool,
    want_snapshot: AtomicBool,
    allocated_since_cycle: AtomicUsize,
}

/// Returned by [`living_objects`]. The collector does not resume sweeping
/// until this is dropped, so the snapshot it came with stays valid for its
/// whole lifetime.
pub struct PauseGuard {
    collector: &'static Collector,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.collector.paused.store(false, Ordering::Release);
        self.collector.pause_release.notify_all();
    }
}

static COLLECTOR: OnceLock<Collector> = OnceLock::new();

fn collector() -> &'static Collector {
    COLLECTOR.get_or_init(|| {
        let c = Collector {
            inner: Mutex::new(Inner {
                pages: Vec::new(),
                registry_cursor: std::ptr::null_mut(),
                page_cursors: HashMap::new(),
                drained: std::collections::HashSet::new(),
                cycle: 0,
                last_living: 0,
                live_snapshot: None,
                terminating: false,
                terminated: false,
                idle_cycles_since_quiet: 0,
            }),
            cycle_done: Condvar::new(),
            paused: AtomicBool::new(false),
            pause_release: Condvar::new(),
            force_requested: AtomicBool::new(false),
            want_snapshot: AtomicBool::new(false),
            allocated_since_cycle: AtomicUsize::new(0),
        };
        c
    });
    let c = COLLECTOR.get().unwrap();
    static SPAWNED: OnceLock<()> = OnceLock::new();
    SPAWNED.get_or_init(|| {
        std::thread::Builder::new()
            .name("reclaim-collector".into())
            .spawn(move || run(collector_static()))
            .expect("failed to spawn collector thread");
    });
    c
}

fn collector_static() -> &'static Collector {
    COLLECTOR.get().expect("collector initialized before its thread is spawned")
}

/// Called by the maker after every successful construction, so the
/// trigger-threshold sleep loop can wake early under allocation pressure.
pub(crate) fn note_allocation() {
    if let Some(c) = COLLECTOR.get() {
        c.allocated_since_cycle.fetch_add(1, Ordering::Relaxed);
    }
}

fn run(c: &'static Collector) {
    loop {
        {
            let inner = c.inner.lock();
            if inner.terminating && inner.idle_cycles_since_quiet >= 2 {
                drop(inner);
                let mut inner = c.inner.lock();
                inner.terminated = true;
                c.cycle_done.notify_all();
                return;
            }
        }
        let freed = run_cycle(c);
        {
            let mut inner = c.inner.lock();
            if freed == 0 && inner.last_living == 0 {
                inner.idle_cycles_since_quiet += 1;
            } else {
                inner.idle_cycles_since_quiet = 0;
            }
            inner.cycle += 1;
            c.allocated_since_cycle.store(0, Ordering::Relaxed);
            c.cycle_done.notify_all();
        }
        sleep_until_woken(c);
    }
}

fn sleep_until_woken(c: &'static Collector) {
    if c.force_requested.swap(false, Ordering::AcqRel) {
        return;
    }
    let runtime = config::runtime();
    let threshold = {
        let inner = c.inner.lock();
        (inner.last_living.max(1) as u64 * runtime.trigger_percentage / 100).max(1)
    };
    let deadline = Instant::now() + Duration::from_secs(runtime.max_sleep_sec);
    let mut inner = c.inner.lock();
    loop {
        if c.force_requested.load(Ordering::Acquire) {
            c.force_requested.store(false, Ordering::Release);
            return;
        }
        if c.allocated_since_cycle.load(Ordering::Relaxed) as u64 >= threshold {
            return;
        }
        if inner.terminating {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        let timed_out = c.cycle_done.wait_for(&mut inner, remaining.min(Duration::from_millis(50))).timed_out();
        if !timed_out {
            // Spurious or real notify; loop around and re-check conditions.
            continue;
        }
    }
}

fn run_cycle(c: &'static Collector) -> usize {
    let mut inner = c.inner.lock();
    register_threads(&mut inner);
    reclaim_deleted_mutators(&mut inner);
    for &page_ptr in &inner.pages {
        unsafe {
            let page = &*page_ptr;
            page.reachable.clear_all();
            // Reset so the reconcile step in `mark_reachable` only catches
            // writes that race with *this* cycle's mark window, not state
            // left over from a store that happened well before this cycle
            // started (e.g. while synchronously wiring up a structure with
            // no root, which must still sweep normally).
            page.state_updated.store(false, Ordering::Release);
        }
    }

    for _pass in 0..8 {
        let roots = mark_stack_roots();
        if !mark_reachable(&inner, roots) {
            break;
        }
    }

    if c.want_snapshot.swap(false, Ordering::AcqRel) {
        let mut snapshot = Vec::new();
        for &page_ptr in &inner.pages {
            let page = unsafe { &*page_ptr };
            for index in page.reachable.iter_set() {
                snapshot.push(page.pointer_of(index) as *const ());
            }
        }
        inner.live_snapshot = Some(snapshot);
        c.paused.store(true, Ordering::Release);
        c.cycle_done.notify_all();
        while c.paused.load(Ordering::Acquire) {
            c.pause_release.wait(&mut inner);
        }
    }

    let freed = remove_garbage(&mut inner);
    release_unused_pages(&inner);
    freed
}

fn register_threads(inner: &mut Inner) {
    let head = mutator::registry_head();
    let until = inner.registry_cursor;
    let mut newly = Vec::new();
    mutator::walk_new(head, until, |m| newly.push(m as *const Mutator as usize));
    inner.registry_cursor = head;
    for addr in newly {
        let mutator_ref = unsafe { &*(addr as *const Mutator) };
        register_pages(inner, mutator_ref);
    }
    // Threads registered before this collector cycle but whose page lists
    // keep growing still need their newest pages picked up every cycle.
    let known: Vec<usize> = inner.page_cursors.keys().copied().collect();
    for addr in known {
        let mutator_ref = unsafe { &*(addr as *const Mutator) };
        register_pages(inner, mutator_ref);
    }
}

/// Reclaims an exited thread's per-type pool state once its mutator record
/// is observed `deleted`. The registry itself stays append-only (a
/// concurrent cycle may be mid-walk through it, see `mutator.rs`), so this
/// can't unlink the record, but it can give back what actually costs
/// memory: the `Reserved` slots still sitting in its pools, which would
/// otherwise never be handed back to any live thread.
fn reclaim_deleted_mutators(inner: &mut Inner) {
    let mut cur = mutator::registry_head();
    while !cur.is_null() {
        let mutator_ref = unsafe { &*cur };
        let key = cur as usize;
        if mutator_ref.deleted.load(Ordering::Acquire) && inner.drained.insert(key) {
            let mut pools = mutator_ref.pools.lock().unwrap();
            for pool in pools.values_mut() {
                pool.drain();
            }
            drop(pools);
            inner.page_cursors.remove(&key);
            log::trace!("reclaim: drained pool state for an exited thread");
        }
        cur = mutator_ref.next.load(Ordering::Acquire);
    }
}

fn register_pages(inner: &mut Inner, mutator_ref: &Mutator) {
    let key = mutator_ref as *const Mutator as usize;
    let head = mutator_ref.pages.load(Ordering::Acquire);
    let until = inner.page_cursors.get(&key).copied().unwrap_or(std::ptr::null_mut());
    let mut cur = head;
    while !cur.is_null() && cur != until {
        inner.pages.push(cur);
        cur = unsafe { (*cur).next.load(Ordering::Acquire) };
    }
    inner.page_cursors.insert(key, head);
}

/// Current stack roots plus every slot still under construction
/// (`UniqueLock`), which is pinned as an implicit root regardless of
/// whether it has been wrapped in a `Stack` handle yet.
fn mark_stack_roots() -> Vec<*const ()> {
    let mut roots = Vec::new();
    let mut cur = mutator::registry_head();
    while !cur.is_null() {
        let m = unsafe { &*cur };
        for root in m.stack_roots.iter_roots() {
            if !root.is_null() {
                roots.push(root as *const ());
            }
        }
        cur = m.next.load(Ordering::Acquire);
    }
    roots
}

/// Re-seeds the worklist with slots a plain graph walk from roots can't
/// find on its own, then drains it. `UniqueLock` slots are re-pushed every
/// pass unconditionally: an under-construction object has no root yet and
/// no write event to key off. `Reachable`/`ReachableAtomic` slots are only
/// re-pushed on a page whose `state_updated` flag has fired since the last
/// pass, and only if not already marked: this is the reconcile pass that
/// catches a race — if a mutator stores a freshly-reachable child into a
/// parent this walk already scanned and marked, the parent won't be
/// re-expanded to find it, but the child's own state flip (and its page's
/// `state_updated` flag) is what lets the next pass pick it up directly.
/// Returns whether any page had a pending update, so the caller knows
/// whether another pass could still find something new.
fn mark_reachable(inner: &Inner, roots: Vec<*const ()>) -> bool {
    let mut worklist = roots;
    let mut any_updated = false;
    for &page_ptr in &inner.pages {
        let page = unsafe { &*page_ptr };
        let updated = page.state_updated.swap(false, Ordering::AcqRel);
        any_updated |= updated;
        for index in 0..page.slot_count() {
            let state = page.state_at(index, Ordering::Acquire);
            let reconcile_candidate = state == SlotState::UniqueLock
                || (updated && matches!(state, SlotState::Reachable | SlotState::ReachableAtomic));
            if reconcile_candidate && !page.reachable.test(index) {
                worklist.push(page.pointer_of(index) as *const ());
            }
        }
    }

    while let Some(ptr) = worklist.pop() {
        if ptr.is_null() {
            continue;
        }
        let page_ptr = unsafe { page::page_of(ptr as *const u8) };
        let page = unsafe { &*page_ptr };
        let index = page.index_of(ptr as *const u8);
        if page.reachable.test(index) {
            continue;
        }
        page.reachable.set(index);

        let type_info = page.type_info;
        if !type_info.child_map.is_final() {
            continue;
        }
        let base = page.pointer_of(index);
        if type_info.child_map.is_unbounded() {
            // Children can live outside this object's own allocation (a
            // boxed-out array's elements); the offset table can't name
            // them, so re-trace the live value instead.
            if let Some(trace_fn) = type_info.trace_dyn.get() {
                unsafe {
                    trace_fn(base, &mut |field: *const ()| {
                        let child = *(field as *const *mut u8);
                        if !child.is_null() {
                            worklist.push(child as *const ());
                        }
                    });
                }
            }
        } else {
            for &word_offset in type_info.child_map.offsets() {
                let field_ptr = unsafe { base.add(word_offset as usize * WORD_SIZE) as *const *mut u8 };
                let child = unsafe { *field_ptr };
                if !child.is_null() {
                    worklist.push(child as *const ());
                }
            }
        }
    }
    any_updated
}

/// Sweeps every known page. A `ReachableAtomic` slot found structurally
/// unreachable decays to `Used` rather than being swept immediately,
/// giving a concurrent loader's "load, then root in a `Stack` handle" one
/// more cycle to be observed; it is only actually destroyed if it is
/// *still* unreachable the next time this runs. This approximates the
/// source design's wall-clock grace period without a per-slot timestamp
/// (see `DESIGN.md`). A slot already in `Destroyed` (an explicit `Unique`
/// drop already ran its destructor) is reclaimed without calling it again.
fn remove_garbage(inner: &mut Inner) -> usize {
    let mut freed = 0usize;
    let mut live = 0usize;
    for &page_ptr in &inner.pages {
        let page = unsafe { &*page_ptr };
        for index in 0..page.slot_count() {
            match page.state_at(index, Ordering::Acquire) {
                SlotState::Unused => {}
                SlotState::Destroyed | SlotState::BadAlloc => {
                    page.store_state_at(index, SlotState::Unused, Ordering::Release);
                }
                // A slot mid-construction (reserved, or pinned by its
                // constructor as an implicit root) can't yet be structurally
                // unreachable; leave it for a later cycle.
                SlotState::Reserved | SlotState::UniqueLock => {
                    live += 1;
                }
                SlotState::Reachable => {
                    if page.reachable.test(index) {
                        live += 1;
                    } else {
                        sweep_slot(page, index);
                        freed += 1;
                    }
                }
                SlotState::ReachableAtomic => {
                    if page.reachable.test(index) {
                        live += 1;
                    } else {
                        page.store_state_at(index, SlotState::Used, Ordering::Release);
                        live += 1;
                    }
                }
                SlotState::Used => {
                    if page.reachable.test(index) {
                        // Re-rooted during its grace cycle; restore full
                        // reachable status instead of decaying it further.
                        page.store_state_at(index, SlotState::Reachable, Ordering::Release);
                        live += 1;
                    } else {
                        sweep_slot(page, index);
                        freed += 1;
                    }
                }
            }
        }
    }
    inner.last_living = live;
    freed
}

fn sweep_slot(page: &Page, index: usize) {
    let ptr = page.pointer_of(index);
    unsafe {
        (page.type_info.drop_in_place)(ptr);
    }
    page.store_state_at(index, SlotState::Unused, Ordering::Release);
}

fn release_unused_pages(inner: &Inner) {
    for &page_ptr in &inner.pages {
        let page = unsafe { &*page_ptr };
        if page.on_empty_list.load(Ordering::Relaxed) {
            continue;
        }
        let all_unused = (0..page.slot_count()).all(|i| page.state_at(i, Ordering::Acquire) == SlotState::Unused);
        if all_unused {
            page.clear_reachable();
            unsafe {
                page.type_info.push_empty_page(page_ptr);
            }
        }
    }
}

/// Requests a collection cycle. Returns `false` without blocking if a
/// `living_objects()` pause is currently in effect; otherwise requests a
/// cycle and, if `wait`, blocks until the next one completes.
pub fn force_collect(wait: bool) -> bool {
    let c = collector();
    if c.paused.load(Ordering::Acquire) {
        return false;
    }
    c.force_requested.store(true, Ordering::Release);
    c.cycle_done.notify_all();
    if wait {
        let mut inner = c.inner.lock();
        let start = inner.cycle;
        while inner.cycle == start && !c.paused.load(Ordering::Acquire) {
            c.cycle_done.wait(&mut inner);
        }
    }
    true
}

/// Snapshots every currently-reachable object's base pointer and pauses the
/// collector for the lifetime of the returned guard.
pub fn living_objects() -> (PauseGuard, Vec<*const ()>) {
    let c = collector();
    c.want_snapshot.store(true, Ordering::Release);
    c.force_requested.store(true, Ordering::Release);
    c.cycle_done.notify_all();
    let mut inner = c.inner.lock();
    while inner.live_snapshot.is_none() {
        c.cycle_done.wait(&mut inner);
    }
    let snapshot = inner.live_snapshot.take().unwrap();
    (PauseGuard { collector: c }, snapshot)
}

/// The live-object count as of the most recently completed sweep.
pub fn last_living_objects_number() -> usize {
    collector().inner.lock().last_living
}

/// Requests termination, runs a few draining cycles, and blocks until the
/// collector thread signals it has stopped producing removals with nothing
/// left alive.
pub fn terminate() {
    let c = collector();
    {
        let mut inner = c.inner.lock();
        inner.terminating = true;
    }
    c.force_requested.store(true, Ordering::Release);
    c.cycle_done.notify_all();
    let mut inner = c.inner.lock();
    while !inner.terminated {
        c.cycle_done.wait(&mut inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::unique::Unique;
    use crate::handle::{Stack, Tracked};
    use crate::maker::make_tracked;

    #[test]
    fn force_collect_reclaims_an_unrooted_object() {
        {
            let _unique = make_tracked(|| 99u64).unwrap();
        }
        assert!(force_collect(true));
    }

    #[test]
    fn rooted_object_survives_a_cycle() {
        let unique = make_tracked(|| 5u64).unwrap();
        let root = Stack::new(unique);
        force_collect(true);
        assert_eq!(unsafe { *root.get() }, 5);
    }

    struct Node {
        next: Tracked<Node>,
    }
    impl crate::trace::Trace for Node {
        fn trace(&self, visit: &mut dyn FnMut(*const ())) {
            visit(self.next.as_traced());
        }
    }

    #[test]
    fn cyclic_graph_is_collected_once_unrooted() {
        // Builds a -> b -> a with no root anywhere else, then checks the
        // cycle doesn't keep itself alive the way a naive refcount would.
        let a = make_tracked(|| Node { next: Tracked::null() }).unwrap();
        let b = make_tracked(|| Node { next: Tracked::null() }).unwrap();
        let a_ptr = a.get() as *mut Node;
        let b_ptr = b.get() as *mut Node;
        // Ownership now lives entirely in the cycle below; forgetting skips
        // the `Unique` destructor that would otherwise fire when `a`/`b` go
        // out of scope still holding their implicit `UniqueLock` root.
        std::mem::forget(a);
        std::mem::forget(b);
        unsafe {
            (*a_ptr).next.store(Unique::from_raw(b_ptr));
            (*b_ptr).next.store(Unique::from_raw(a_ptr));
        }
        assert!(force_collect(true));
        unsafe {
            let page = page::page_of(a_ptr as *const u8);
            let index = (*page).index_of(a_ptr as *const u8);
            assert_eq!((*page).state_at(index, Ordering::Acquire), SlotState::Unused);
        }
    }

    #[test]
    fn living_objects_snapshot_matches_last_count_and_pauses() {
        let unique = make_tracked(|| 1u64).unwrap();
        let root = Stack::new(unique);
        force_collect(true);
        let (_guard, snapshot) = living_objects();
        assert_eq!(snapshot.len(), last_living_objects_number());
        assert!(!force_collect(true));
        drop(root);
    }
}
