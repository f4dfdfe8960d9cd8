//! Stack-size policy shared by every coroutine created on a thread
//! (spec.md §4.2 "Stack provisioning invariants").
//!
//! The teacher's `options.rs` fixes `DEFAULT_STACK_SIZE` at 2 MiB and its
//! `stack/stack_standard.rs` rounds requested sizes up to a page multiple
//! before handing them to `mmap`. `cocoro` keeps the same shape — a
//! per-thread default, clamped up to a floor — but defers the actual
//! mapping to `corosensei::DefaultStack`, which already clamps internally to
//! its own `MIN_STACK_SIZE`.

use corosensei::stack::{self, DefaultStack};

use crate::error::{CoroError, CoroResult};

/// `COROUTINE_DEFAULT_STACK_SIZE` from `Coroutines.h`, kept as the default
/// a thread gets when `configure` doesn't request a specific size.
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// Clamp a requested stack size up to corosensei's allocator floor.
pub fn clamp(requested: usize) -> usize {
    requested.max(stack::MIN_STACK_SIZE)
}

/// Allocate a fresh stack of (clamped) `size` bytes.
pub fn allocate(size: usize) -> CoroResult<DefaultStack> {
    DefaultStack::new(clamp(size)).map_err(|_| CoroError::NoMem)
}
