//! `Cocondition`: a coroutine-aware condition variable (spec.md §4.5).
//!
//! The teacher has no condition variable of its own; this is built fresh in
//! the same idiom as `mutex.rs` (FIFO waiter queue, `WAIT`/`TIMEDWAIT`
//! yield-suspend instead of blocking the OS thread), enriched by
//! `valibali-cluu`'s scheduler vocabulary for strict FIFO wake ordering:
//! `signal` wakes exactly the longest-waiting coroutine, `broadcast` wakes
//! everyone currently queued, and a coroutine joining after a `broadcast`
//! does not retroactively consume one of its wakeups.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use log::trace;

use crate::clock;
use crate::coroutine::{pack, CoroutineId, Waitable};
use crate::error::{CoroResult, Status};
use crate::mutex::Comutex;
use crate::scheduler;

struct Inner {
    waiters: VecDeque<CoroutineId>,
    pending_signals: u32,
}

pub struct Cocondition {
    inner: StdMutex<Inner>,
}

impl Cocondition {
    pub fn new() -> Rc<Cocondition> {
        Rc::new(Cocondition {
            inner: StdMutex::new(Inner {
                waiters: VecDeque::new(),
                pending_signals: 0,
            }),
        })
    }

    /// Number of coroutines currently parked on this condition.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().unwrap().waiters.len()
    }

    /// Atomically release `mtx` and block until woken by `signal`/
    /// `broadcast`, then reacquire `mtx` before returning (spec.md §4.5
    /// "wait").
    pub fn wait(self: &Rc<Self>, mtx: &Rc<Comutex>) -> CoroResult<()> {
        let me = scheduler::running()?;
        mtx.unlock()?;
        self.park(me, None)?;
        mtx.lock()?;
        Ok(())
    }

    /// As [`Cocondition::wait`], but gives up (without consuming a signal)
    /// after `timeout` and returns [`Status::TimedOut`] (spec.md §4.5
    /// "timedwait").
    pub fn timedwait(self: &Rc<Self>, mtx: &Rc<Comutex>, timeout: Duration) -> CoroResult<Status> {
        let me = scheduler::running()?;
        let deadline = clock::deadline_after(timeout);
        mtx.unlock()?;
        let status = match self.park(me, Some(deadline)) {
            Ok(()) => Status::Success,
            Err(_) => Status::TimedOut,
        };
        mtx.lock()?;
        Ok(status)
    }

    fn park(self: &Rc<Self>, me: CoroutineId, deadline: Option<u64>) -> CoroResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.waiters.contains(&me) {
                inner.waiters.push_back(me);
            }
        }
        loop {
            if let Some(d) = deadline {
                if clock::is_past(d) {
                    let mut inner = self.inner.lock().unwrap();
                    inner.waiters.retain(|&w| w != me);
                    return Err(crate::error::CoroError::InvalidWaitState);
                }
            }
            scheduler::set_blocking_cocondition(me, Some(self.clone() as Rc<dyn Waitable>))?;
            if deadline.is_some() {
                scheduler::yield_timedwait(pack(()));
            } else {
                scheduler::yield_wait(pack(()));
            }
            scheduler::set_blocking_cocondition(me, None)?;

            let mut inner = self.inner.lock().unwrap();
            if inner.waiters.front() == Some(&me) && inner.pending_signals > 0 {
                inner.waiters.pop_front();
                inner.pending_signals -= 1;
                return Ok(());
            }
        }
    }

    /// Wake the single longest-waiting coroutine (spec.md §4.5 "signal").
    pub fn signal(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.pending_signals < inner.waiters.len() as u32 {
            inner.pending_signals += 1;
            trace!("cocondition signaled, {} waiters queued", inner.waiters.len());
        }
    }

    /// Wake every coroutine currently queued (spec.md §4.5 "broadcast").
    pub fn broadcast(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending_signals = inner.waiters.len() as u32;
        trace!("cocondition broadcast to {} waiters", inner.waiters.len());
    }
}

impl Waitable for Cocondition {
    fn unlink(&self, id: CoroutineId) {
        let mut inner = self.inner.lock().unwrap();
        inner.waiters.retain(|&w| w != id);
    }
}
