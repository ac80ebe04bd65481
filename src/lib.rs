//! A concurrent, real-time, non-moving tracing garbage collector.
//!
//! Mutator threads allocate through [`make_tracked`] (or
//! [`array::make_tracked_array`] for arrays), getting back a [`handle::Unique`]
//! that owns the new object exclusively until it's dropped or moved into a
//! [`handle::Tracked`], [`handle::Stack`], or [`handle::Atomic`] slot, at
//! which point the object becomes part of the collector's reachability
//! graph. Exactly one background collector thread runs concurrently with
//! any number of mutators: no stop-the-world pause, no mutator safepoint
//! polling. See `DESIGN.md` for how each module grounds in the design this
//! crate follows.

pub mod array;
pub mod block;
pub mod block_allocator;
pub mod childmap;
pub mod collector;
pub mod config;
pub mod error;
pub mod handle;
pub mod large;
pub mod logging;
pub mod maker;
pub mod metadata;
pub mod mmap;
pub mod mutator;
pub mod page;
pub mod pool;
pub mod stackroot;
pub mod state;
pub mod trace;
pub mod typeinfo;

pub use array::{make_tracked_array, make_tracked_array_filled, Array};
pub use collector::{force_collect, last_living_objects_number, living_objects, terminate, PauseGuard};
pub use error::{GcError, Result};
pub use handle::{Atomic, Stack, Tracked, Unique, Unsafe, Weak};
pub use maker::make_tracked;
pub use metadata::{get_metadata, set_metadata};
pub use trace::Trace;

/// Installs the crate's logger (a no-op if one is already installed or the
/// `builtin_env_logger` feature is off). Call once near process start if you
/// want this crate's `log` output without wiring your own subscriber.
pub fn init_logging() {
    logging::try_init();
}
