// Copyright 2013 The Rust Project Developers. See the COPYRIGHT
// file at the top-level directory of this distribution and at
// http://rust-lang.org/COPYRIGHT.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A cooperative, stackful coroutine runtime: `create`/`resume`/`yield`
//! over coroutines scheduled on their own stack, plus the synchronization
//! primitives a coroutine-heavy program needs — a coroutine-aware mutex
//! (`Comutex`), condition variable (`Cocondition`), typed per-coroutine
//! message queues with request/reply correlation, cooperative deadlock
//! detection, and an optional per-thread shim for running several
//! independent coroutine groups across OS threads.
//!
//! A coroutine runs until it `yield`s, returns, or calls a blocking
//! primitive (which internally yields a sentinel); the caller of `resume`
//! decides when to run it again. Nothing here preempts a coroutine or
//! migrates one between threads.

pub mod builder;
pub mod clock;
pub mod condvar;
pub mod coroutine;
pub mod deadlock;
pub mod error;
pub mod message;
pub mod mutex;
pub mod options;
pub mod scheduler;
pub mod stack;
pub mod thread;

pub use builder::Builder;
pub use condvar::Cocondition;
pub use coroutine::{pack, unpack, unit, CoroutineId, CoroutineState, Payload, Waitable};
pub use deadlock::deadlocked;
pub use error::{CoroError, CoroResult, ResumeOutcome, Status};
pub use message::{Message, MessageQueue};
pub use mutex::{Comutex, ComutexMode};
pub use options::Options;
pub use scheduler::{
    configure, id, inbox, is_configured, receive, resume, root, running, send_to, set_id, state,
    terminate, yield_value,
};

/// Spawn a new coroutine on this thread with default [`Builder`] settings.
/// Equivalent to `Builder::new().spawn(f)`.
pub fn spawn<F>(f: F) -> CoroResult<CoroutineId>
where
    F: FnOnce(Payload) -> Payload + 'static,
{
    Builder::new().spawn(f)
}
