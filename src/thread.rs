//! Optional OS-thread shim (spec.md §4.8): per-thread inbox, thread-safe
//! cross-thread delivery, and a round-robin driver for resuming coroutines
//! blocked on mutex/condition handoffs.
//!
//! Grounded on `environment.rs`'s `thread_local!` pattern for the per-thread
//! registration, and on the teacher's `Scheduler::run` thread-spawn wrapper
//! in `scheduler.rs` for "create inbox, run user code, tear down" shape —
//! generalized from its work-stealing `deque`/`mio` event loop (out of
//! scope per spec.md's non-goals) to a plain `Arc<StdMutex<VecDeque<_>>>` +
//! `Condvar` mailbox, since cross-thread delivery here only ever needs to
//! wake a sleeping thread, not steal work from it.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use log::trace;

use crate::coroutine::{CoroutineId, Payload};
use crate::error::{CoroError, CoroResult, ResumeOutcome};
use crate::scheduler;

/// Identifies a thread's inbox across threads. Opaque, stable for the
/// lifetime of the thread that registered it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ThreadId(u64);

/// A message routed through a [`ThreadInbox`]. Deliberately simpler than
/// [`crate::message::Message`] (no `reply_to`): a cross-thread mailbox is
/// genuinely `Send`, but `Message::reply_to` holds an `Rc<MessageQueue>`,
/// which is not — replying across threads means sending back a `ThreadId`,
/// not a queue handle.
pub struct ThreadMessage {
    pub type_tag: i64,
    pub payload: Payload,
    pub from: ThreadId,
}

impl ThreadMessage {
    pub fn new(type_tag: i64, payload: Payload, from: ThreadId) -> ThreadMessage {
        ThreadMessage { type_tag, payload, from }
    }
}

/// A real OS-blocking mailbox (spec.md §4.8 "OS-condvar-backed queue"),
/// shared between whichever thread owns it and any thread that calls
/// [`send_to`].
pub struct ThreadInbox {
    queue: StdMutex<VecDeque<ThreadMessage>>,
    cond: Condvar,
}

impl ThreadInbox {
    fn new() -> Arc<ThreadInbox> {
        Arc::new(ThreadInbox {
            queue: StdMutex::new(VecDeque::new()),
            cond: Condvar::new(),
        })
    }

    fn push(&self, msg: ThreadMessage) {
        let mut q = self.queue.lock().unwrap();
        q.push_back(msg);
        self.cond.notify_all();
    }

    /// Non-blocking: take the head message, if any.
    pub fn pop(&self) -> Option<ThreadMessage> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Block the real OS thread (not a coroutine) until a message arrives
    /// or `timeout` elapses. Intended for a thread's idle/driver loop, not
    /// for use inside a coroutine body — blocking the OS thread would stall
    /// every sibling coroutine scheduled on it.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<ThreadMessage> {
        let mut q = self.queue.lock().unwrap();
        loop {
            if let Some(msg) = q.pop_front() {
                return Some(msg);
            }
            match timeout {
                None => q = self.cond.wait(q).unwrap(),
                Some(d) => {
                    let (guard, result) = self.cond.wait_timeout(q, d).unwrap();
                    q = guard;
                    if result.timed_out() {
                        return q.pop_front();
                    }
                }
            }
        }
    }
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
static REGISTRY: OnceLock<StdMutex<HashMap<u64, Arc<ThreadInbox>>>> = OnceLock::new();

fn registry() -> &'static StdMutex<HashMap<u64, Arc<ThreadInbox>>> {
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

thread_local! {
    static THIS_THREAD: (ThreadId, Arc<ThreadInbox>) = {
        let id = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        let inbox = ThreadInbox::new();
        registry().lock().unwrap().insert(id.0, inbox.clone());
        trace!("thread inbox registered: {id:?}");
        (id, inbox)
    };
}

/// This thread's id, registering its inbox on first call
/// (spec.md §4.8 "creates its thread inbox").
pub fn current() -> ThreadId {
    THIS_THREAD.with(|(id, _)| *id)
}

/// This thread's inbox, for a driver loop to poll or block on directly.
pub fn inbox() -> Arc<ThreadInbox> {
    THIS_THREAD.with(|(_, inbox)| inbox.clone())
}

/// Deliver `msg` to `target`'s inbox from any thread (spec.md §4.8
/// "cross-thread message delivery").
pub fn send_to(target: ThreadId, msg: ThreadMessage) -> CoroResult<()> {
    let registry = registry().lock().unwrap();
    match registry.get(&target.0) {
        Some(inbox) => {
            inbox.push(msg);
            Ok(())
        }
        None => Err(CoroError::UnknownThread),
    }
}

/// Spawn an OS thread that configures its own scheduler, registers its
/// inbox, runs `f`, and unregisters on the way out — the teacher's
/// "wrap the entry function" shape (spec.md §4.8 "Every spawned OS thread
/// wraps its entry function with logic that creates its thread inbox, runs
/// the user function, destroys its inbox, exits").
pub fn spawn<F>(options: crate::options::Options, f: F) -> std::thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::spawn(move || {
        scheduler::configure(options).expect("configure on new thread");
        let id = current();
        f();
        if let Entry::Occupied(entry) = registry().lock().unwrap().entry(id.0) {
            entry.remove();
        }
    })
}

/// Round-robin over `ids`, resuming each that hasn't finished yet with a
/// fresh `input` until a full pass makes no progress (spec.md §4.3
/// "Round-robin scheduling pattern": "iterate over owned coroutines; for
/// each that is both resumable and not finished, resume with null; stop
/// when a full pass yields no resumes"). A coroutine that yields plainly
/// stays in rotation; one that completes, or turns out not resumable or
/// corrupt, drops out. Returns the terminal [`ResumeOutcome`] for each id
/// that reached one, in `ids` order.
pub fn run_round_robin(
    ids: &[CoroutineId],
    mut input: impl FnMut(CoroutineId) -> Payload,
) -> CoroResult<Vec<Option<ResumeOutcome>>> {
    let mut finished: Vec<Option<ResumeOutcome>> = ids.iter().map(|_| None).collect();
    loop {
        let mut progressed = false;
        for (i, &id) in ids.iter().enumerate() {
            if finished[i].is_some() {
                continue;
            }
            match scheduler::resume(id, input(id))? {
                ResumeOutcome::Wait | ResumeOutcome::TimedWait => {}
                ResumeOutcome::Yielded(_) => progressed = true,
                outcome @ (ResumeOutcome::Completed(_) | ResumeOutcome::NotResumable | ResumeOutcome::Corrupt) => {
                    finished[i] = Some(outcome);
                    progressed = true;
                }
            }
        }
        if finished.iter().all(Option::is_some) || !progressed {
            break;
        }
    }
    Ok(finished)
}
