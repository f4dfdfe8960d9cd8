//! Per-thread configuration, set once via [`crate::scheduler::configure`]
//! (spec.md §4.3 "configure").
//!
//! Kept from the teacher's `options.rs` (`DEFAULT_STACK_SIZE`, a plain data
//! struct handed to the scheduler), extended with `state_data` and the two
//! lifecycle callbacks spec.md §4.3 calls for.

use crate::coroutine::{CoroutineId, Payload};
use crate::stack::DEFAULT_STACK_SIZE;

/// Configuration fixed for the lifetime of a thread's scheduler.
pub struct Options {
    /// Stack size shared by every coroutine created on this thread
    /// (spec.md §4.2: fixed at `configure` time, clamped to a minimum).
    pub stack_size: usize,
    /// Arbitrary application state reachable from anywhere on this thread's
    /// coroutines without smuggling it through every entry function.
    pub state_data: Option<Payload>,
    /// Invoked right after a coroutine is created, before its first resume.
    pub on_create: Option<Box<dyn Fn(CoroutineId) + Send>>,
    /// Invoked right after a coroutine terminates (completes or is killed).
    pub on_terminate: Option<Box<dyn Fn(CoroutineId) + Send>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            stack_size: DEFAULT_STACK_SIZE,
            state_data: None,
            on_create: None,
            on_terminate: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn state_data(mut self, data: Payload) -> Self {
        self.state_data = Some(data);
        self
    }

    pub fn on_create(mut self, f: impl Fn(CoroutineId) + Send + 'static) -> Self {
        self.on_create = Some(Box::new(f));
        self
    }

    pub fn on_terminate(mut self, f: impl Fn(CoroutineId) + Send + 'static) -> Self {
        self.on_terminate = Some(Box::new(f));
        self
    }
}
