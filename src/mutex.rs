//! `Comutex`: a coroutine-aware mutex (spec.md §4.4).
//!
//! Grounded on `sync/mutex.rs`'s `Mutex<T>`/`LockGuard` (a spinlock-backed
//! data mutex), generalized from "busy-spin until free" to "yield until
//! free": a coroutine that can't acquire the lock registers itself in the
//! FIFO waiter queue and suspends via `WAIT`/`TIMEDWAIT` rather than
//! spinning, letting sibling coroutines run while it's blocked. Unlocking
//! only updates ownership bookkeeping; it is the driver loop's job (see
//! `thread.rs`) to resume a waiter again, at which point its `lock` call
//! notices it is now the owner and returns.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use log::trace;

use crate::clock;
use crate::coroutine::{pack, CoroutineId, Payload, Waitable};
use crate::error::{CoroError, CoroResult, Status};
use crate::scheduler;

/// Locking discipline and capability flags for a [`Comutex`] (spec.md §4.4
/// "mode"), mirroring the original's bitmask (`comutexPlain`/`comutexRecursive`/
/// `comutexTimed` in `CoroutineSync.h`): any subset of [`ComutexMode::PLAIN`],
/// [`ComutexMode::RECURSIVE`], [`ComutexMode::TIMED`] can be combined with
/// `|`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ComutexMode(u8);

impl ComutexMode {
    /// Baseline: relocking by the current owner deadlocks, as with a plain
    /// `pthread_mutex_t`, and `timedlock` is unavailable.
    pub const PLAIN: ComutexMode = ComutexMode(0);
    /// The owner may lock again; each lock must be matched by an unlock.
    pub const RECURSIVE: ComutexMode = ComutexMode(1 << 0);
    /// `timedlock` is permitted; without this flag it fails with
    /// [`CoroError::NotTimed`].
    pub const TIMED: ComutexMode = ComutexMode(1 << 1);

    fn contains(self, flag: ComutexMode) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for ComutexMode {
    type Output = ComutexMode;

    fn bitor(self, rhs: ComutexMode) -> ComutexMode {
        ComutexMode(self.0 | rhs.0)
    }
}

struct Inner {
    mode: ComutexMode,
    owner: Option<CoroutineId>,
    recursion: u32,
    waiters: VecDeque<CoroutineId>,
    /// The value most recently returned by a nested yield during a blocking
    /// `lock`/`timedlock` call, or `None` if the lock was acquired on the
    /// first attempt (spec.md §3 "last_yield_value").
    last_yield_value: Option<Payload>,
}

pub struct Comutex {
    inner: StdMutex<Inner>,
}

impl Comutex {
    pub fn new(mode: ComutexMode) -> Rc<Comutex> {
        Rc::new(Comutex {
            inner: StdMutex::new(Inner {
                mode,
                owner: None,
                recursion: 0,
                waiters: VecDeque::new(),
                last_yield_value: None,
            }),
        })
    }

    /// Current owner, if any (spec.md §4.4 "owner").
    pub fn owner(&self) -> Option<CoroutineId> {
        self.inner.lock().unwrap().owner
    }

    /// The value most recently returned by a nested yield during a blocking
    /// `lock`/`timedlock` call, consumed on read and cleared again on the
    /// next call (spec.md §4.4 "last_yield_value").
    pub fn last_yield_value(&self) -> Option<Payload> {
        self.inner.lock().unwrap().last_yield_value.take()
    }

    /// Attempt to acquire without blocking (spec.md §4.4 "trylock").
    pub fn trylock(&self) -> CoroResult<Status> {
        let me = scheduler::running()?;
        let mut inner = self.inner.lock().unwrap();
        if try_acquire(&mut inner, me) {
            Ok(Status::Success)
        } else {
            Ok(Status::Busy)
        }
    }

    /// Acquire, yielding this coroutine while the mutex is held elsewhere
    /// (spec.md §4.4 "lock"). Once a call has been queued, `unlock`'s FIFO
    /// hand-off grants ownership directly (see [`Comutex::unlock`]); a
    /// retry after waking only needs to notice that, not race `try_acquire`
    /// again (which would misread "I already hold it via hand-off" as a
    /// same-owner relock and, in `Plain` mode, refuse it).
    pub fn lock(self: &Rc<Self>) -> CoroResult<()> {
        let me = scheduler::running()?;
        self.inner.lock().unwrap().last_yield_value = None;
        let mut enqueued = false;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if enqueued {
                    if inner.owner == Some(me) {
                        return Ok(());
                    }
                } else if try_acquire(&mut inner, me) {
                    return Ok(());
                }
                enqueue(&mut inner, me);
                enqueued = true;
            }
            scheduler::set_blocking_comutex(me, Some(self.clone() as Rc<dyn Waitable>))?;
            let yielded = scheduler::yield_wait(pack(()));
            scheduler::set_blocking_comutex(me, None)?;
            self.inner.lock().unwrap().last_yield_value = Some(yielded);
        }
    }

    /// Acquire with a bound on how long to wait (spec.md §4.4 "timedlock").
    pub fn timedlock(self: &Rc<Self>, timeout: Duration) -> CoroResult<Status> {
        let me = scheduler::running()?;
        {
            let mut inner = self.inner.lock().unwrap();
            if !inner.mode.contains(ComutexMode::TIMED) {
                return Err(CoroError::NotTimed);
            }
            inner.last_yield_value = None;
        }
        let deadline = clock::deadline_after(timeout);
        let mut enqueued = false;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if enqueued {
                    if inner.owner == Some(me) {
                        return Ok(Status::Success);
                    }
                } else if try_acquire(&mut inner, me) {
                    return Ok(Status::Success);
                }
                if clock::is_past(deadline) {
                    inner.waiters.retain(|&w| w != me);
                    return Ok(Status::TimedOut);
                }
                enqueue(&mut inner, me);
                enqueued = true;
            }
            scheduler::set_blocking_comutex(me, Some(self.clone() as Rc<dyn Waitable>))?;
            let yielded = scheduler::yield_timedwait(pack(()));
            scheduler::set_blocking_comutex(me, None)?;
            self.inner.lock().unwrap().last_yield_value = Some(yielded);
            if clock::is_past(deadline) {
                let mut inner = self.inner.lock().unwrap();
                if inner.owner != Some(me) {
                    inner.waiters.retain(|&w| w != me);
                    return Ok(Status::TimedOut);
                }
            }
        }
    }

    /// Release. Hands ownership directly to the head of the FIFO waiter
    /// queue, if any (spec.md §8 "FIFO fairness"); that waiter only actually
    /// resumes once the driver loop resumes it again.
    pub fn unlock(&self) -> CoroResult<()> {
        let me = scheduler::running()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.owner != Some(me) {
            return Err(CoroError::UnlockNotOwner);
        }
        if inner.mode.contains(ComutexMode::RECURSIVE) && inner.recursion > 1 {
            inner.recursion -= 1;
            return Ok(());
        }
        inner.owner = inner.waiters.pop_front();
        inner.recursion = if inner.owner.is_some() { 1 } else { 0 };
        trace!("comutex unlocked by {me:?}, new owner {:?}", inner.owner);
        Ok(())
    }
}

fn try_acquire(inner: &mut Inner, me: CoroutineId) -> bool {
    match inner.owner {
        None => {
            inner.owner = Some(me);
            inner.recursion = 1;
            true
        }
        Some(owner) if owner == me && inner.mode.contains(ComutexMode::RECURSIVE) => {
            inner.recursion += 1;
            true
        }
        _ => false,
    }
}

fn enqueue(inner: &mut Inner, me: CoroutineId) {
    if !inner.waiters.contains(&me) {
        inner.waiters.push_back(me);
    }
}

impl Waitable for Comutex {
    fn owner(&self) -> Option<CoroutineId> {
        self.inner.lock().unwrap().owner
    }

    fn unlink(&self, id: CoroutineId) {
        let mut inner = self.inner.lock().unwrap();
        inner.waiters.retain(|&w| w != id);
        if inner.owner == Some(id) {
            inner.owner = inner.waiters.pop_front();
            inner.recursion = if inner.owner.is_some() { 1 } else { 0 };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::coroutine::unpack;
    use crate::error::ResumeOutcome;
    use crate::options::Options;
    use crate::scheduler;

    fn reset() {
        scheduler::configure(Options::new()).unwrap();
    }

    #[test]
    fn trylock_then_unlock_round_trips() {
        reset();
        let m = Comutex::new(ComutexMode::PLAIN);
        assert_eq!(m.trylock().unwrap(), Status::Success);
        assert_eq!(m.trylock().unwrap(), Status::Busy);
        m.unlock().unwrap();
    }

    #[test]
    fn unlock_by_non_owner_errors() {
        reset();
        let m = Comutex::new(ComutexMode::PLAIN);
        assert!(matches!(m.unlock(), Err(CoroError::UnlockNotOwner)));
    }

    #[test]
    fn recursive_mode_allows_relock_by_owner_but_not_others() {
        reset();
        let m = Comutex::new(ComutexMode::RECURSIVE);
        assert_eq!(m.trylock().unwrap(), Status::Success);
        // same owner (root) may relock freely.
        assert_eq!(m.trylock().unwrap(), Status::Success);

        let m2 = m.clone();
        let other = Builder::new().spawn(move |_| pack(m2.trylock().unwrap())).unwrap();
        match scheduler::resume(other, pack(())).unwrap() {
            ResumeOutcome::Completed(v) => assert_eq!(unpack::<Status>(v).unwrap(), Status::Busy),
            o => panic!("unexpected: {o:?}"),
        }

        // two matching unlocks release it for root's own recursion count.
        m.unlock().unwrap();
        m.unlock().unwrap();
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn waiter_acquires_fifo_after_unlock_and_redrive() {
        reset();
        let m = Comutex::new(ComutexMode::PLAIN);
        m.trylock().unwrap();

        let m2 = m.clone();
        let waiter = Builder::new()
            .spawn(move |input| {
                m2.lock().unwrap();
                m2.unlock().unwrap();
                input
            })
            .unwrap();

        // First resume blocks on the lock.
        assert!(matches!(scheduler::resume(waiter, pack(())).unwrap(), ResumeOutcome::Wait));
        m.unlock().unwrap();
        assert_eq!(m.owner(), Some(waiter));
        // Redriving now lets it finish.
        match scheduler::resume(waiter, pack(())).unwrap() {
            ResumeOutcome::Completed(_) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn timedlock_times_out_when_never_released() {
        reset();
        let m = Comutex::new(ComutexMode::TIMED);
        m.trylock().unwrap();

        let m2 = m.clone();
        let waiter = Builder::new()
            .spawn(move |_| pack(m2.timedlock(Duration::from_millis(1)).unwrap()))
            .unwrap();
        assert!(matches!(
            scheduler::resume(waiter, pack(())).unwrap(),
            ResumeOutcome::TimedWait
        ));
        std::thread::sleep(Duration::from_millis(5));
        match scheduler::resume(waiter, pack(())).unwrap() {
            ResumeOutcome::Completed(v) => assert_eq!(unpack::<Status>(v).unwrap(), Status::TimedOut),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn timedlock_without_timed_flag_errors() {
        reset();
        let m = Comutex::new(ComutexMode::PLAIN);
        assert!(matches!(
            m.timedlock(Duration::from_millis(1)),
            Err(CoroError::NotTimed)
        ));
    }

    #[test]
    fn last_yield_value_is_none_on_uncontended_lock_and_set_after_blocking() {
        reset();
        let m = Comutex::new(ComutexMode::PLAIN);
        m.lock().unwrap();
        assert!(m.last_yield_value().is_none());
        m.unlock().unwrap();

        m.trylock().unwrap();
        let m2 = m.clone();
        let waiter = Builder::new()
            .spawn(move |_| {
                m2.lock().unwrap();
                m2.unlock().unwrap();
                pack(())
            })
            .unwrap();
        assert!(matches!(scheduler::resume(waiter, pack(())).unwrap(), ResumeOutcome::Wait));
        m.unlock().unwrap();
        // redrive with a distinguishable value so we can confirm it was the
        // one forwarded back from the blocked `yield` call.
        match scheduler::resume(waiter, pack(77i32)).unwrap() {
            ResumeOutcome::Completed(_) => {}
            other => panic!("unexpected: {other:?}"),
        }
        let forwarded = m.last_yield_value().expect("lock blocked, so a yield value was recorded");
        assert_eq!(unpack::<i32>(forwarded).unwrap(), 77);
    }
}
