//! Monotonic clock helpers shared by `Comutex`/`Cocondition` timed waits.
//!
//! Grounded on the teacher's direct `libc` dependency: rather than pull in a
//! higher-level time crate (absent from the whole retrieved pack), this
//! reaches straight for `libc::clock_gettime(CLOCK_MONOTONIC, ..)`, the way
//! `examples/rustcc-coroutine-rs` uses `libc` elsewhere.

use std::time::Duration;

/// Nanoseconds since an unspecified epoch, from `CLOCK_MONOTONIC`. Only
/// differences between two calls are meaningful.
pub fn now_nanoseconds() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, exclusively-borrowed `timespec` for the
    // duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

/// Absolute deadline `dur` from now, for `timedlock`/`timedwait` calls.
pub fn deadline_after(dur: Duration) -> u64 {
    now_nanoseconds().saturating_add(dur.as_nanos() as u64)
}

/// Whether the given absolute deadline (as produced by [`deadline_after`])
/// has already passed.
pub fn is_past(deadline_ns: u64) -> bool {
    now_nanoseconds() >= deadline_ns
}
