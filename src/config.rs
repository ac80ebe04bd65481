//! Compile-time tunables plus a handful of environment-overridable knobs.
//!
//! Values are carried over from the original implementation's configuration
//! header rather than re-derived, since nothing in this crate depends on
//! their exact magnitude beyond "large enough stack, enough type slots".

use std::sync::OnceLock;

/// Size, in bytes, of a single managed page. Must be a power of two.
pub const PAGE_SIZE: usize = 0x10000;

/// Upper bound on the address range a mutator's call stack can occupy.
/// Used to size the stack-root table.
pub const MAX_STACK_SIZE: usize = 0x400000;

/// Maximum number of distinct registered `T` types across the process.
pub const MAX_TYPES_NUMBER: usize = 4096;

/// Grace period, in milliseconds, before a CAS-overwritten `ReachableAtomic`
/// slot may be reclaimed in the design this crate follows. This crate has no
/// per-slot timestamp to measure it against, so `collector.rs` instead grants
/// one extra sweep cycle of grace (see `DESIGN.md`); kept here for parity
/// with the source configuration surface.
pub const ATOMIC_DELETION_DELAY_MSEC: u64 = 100;

/// Default ceiling on how long the collector sleeps between cycles when
/// nothing forces it awake sooner.
pub const MAX_SLEEP_SEC: u64 = 30;

/// Default allocation/removal ratio, as a percentage, that wakes the
/// collector early.
pub const TRIGGER_PERCENTAGE: u64 = 25;

pub const PAGES_PER_BLOCK: usize = 15;
pub const BLOCK_SIZE: usize = PAGE_SIZE * (PAGES_PER_BLOCK + 1);

const _: () = assert!(PAGE_SIZE.is_power_of_two());
const _: () = assert!(MAX_STACK_SIZE % PAGE_SIZE == 0);
const _: () = assert!(MAX_TYPES_NUMBER > 0);
const _: () = assert!(TRIGGER_PERCENTAGE > 0 && TRIGGER_PERCENTAGE <= 100);

/// Knobs that can be overridden at process start without a rebuild.
pub struct RuntimeConfig {
    pub max_sleep_sec: u64,
    pub trigger_percentage: u64,
}

fn parse_env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

static RUNTIME: OnceLock<RuntimeConfig> = OnceLock::new();

/// Returns the process-wide runtime configuration, reading the backing
/// environment variables on first access only.
pub fn runtime() -> &'static RuntimeConfig {
    RUNTIME.get_or_init(|| RuntimeConfig {
        max_sleep_sec: parse_env_u64("RECLAIM_MAX_SLEEP_SEC", MAX_SLEEP_SEC),
        trigger_percentage: parse_env_u64("RECLAIM_TRIGGER_PERCENTAGE", TRIGGER_PERCENTAGE),
    })
}
