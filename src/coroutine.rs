//! The coroutine object: identity, state, guard words and the slots the
//! scheduler's arena stores them in (spec.md §3 "Coroutine").
//!
//! The teacher (`coroutine_unique.rs`) represents a coroutine as
//! `Handle(Unique<Coroutine>)`, a raw owning pointer shared between the
//! running/idle stacks and whatever suspended frame references it. Mutex
//! wait queues and condition waiter lists are naturally cyclic (owner points
//! at waiters, waiters point back at what they're blocked on), which doesn't
//! fit a tree-shaped owner like `Box`/`Unique` without `unsafe`. Per spec.md
//! §9's design note, `cocoro` instead stores every coroutine in a
//! `Scheduler`-owned arena (`Vec<Slot>`) and hands out non-owning
//! `CoroutineId` handles (index + generation) everywhere a pointer would
//! have gone in the teacher.

use std::any::Any;
use std::rc::Rc;

use corosensei::stack::DefaultStack;
use corosensei::Coroutine;

use crate::message::MessageQueue;

/// The original C implementation's corruption sentinel
/// (`COROUTINE_GUARD_VALUE` in `Coroutines.h`), kept verbatim so a guard
/// word dumped in a debugger still reads as the number a reader of the
/// original source would recognize.
pub const GUARD_VALUE: u32 = 0x4abc_4abc;

/// `COROUTINE_ID_NOT_SET` from `Coroutines.h`: the id of a coroutine that
/// was never assigned an application-level id.
pub const ID_NOT_SET: u64 = u64::MAX;

/// The universal type-erased value passed between `resume`/`yield`, stored
/// in messages, and returned from a coroutine's entry function. Mirrors the
/// tagged-union "passed value" of spec.md §3; corosensei's closures need not
/// be `Send` themselves, but the value crossing a coroutine boundary must be
/// `Send` so it can also travel through a thread-safe message queue.
pub type Payload = Box<dyn Any + Send>;

/// Wrap a concrete value as a [`Payload`].
pub fn pack<T: Any + Send>(value: T) -> Payload {
    Box::new(value)
}

/// Unwrap a [`Payload`] back to a concrete type, returning the payload
/// unchanged if the type doesn't match.
pub fn unpack<T: Any + Send>(payload: Payload) -> Result<T, Payload> {
    payload.downcast::<T>().map(|b| *b).map_err(|b| b as Payload)
}

/// A payload carrying no data, for operations that don't need to pass one.
pub fn unit() -> Payload {
    pack(())
}

/// Non-owning handle into the scheduler's coroutine arena. `index` is the
/// slot, `generation` guards against ABA when a slot is recycled after its
/// occupant terminates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CoroutineId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Lifecycle state of a coroutine (spec.md §3 "Coroutine").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CoroutineState {
    NotRunning,
    Running,
    Blocked,
}

/// What a coroutine is internally yielded as; tags the out-of-band sentinel
/// a blocking primitive needs `resume` to see, without overloading the
/// payload channel used for ordinary yields (spec.md §9, "split the return
/// channel").
pub(crate) enum YieldMsg {
    Plain(Payload),
    Wait(Payload),
    TimedWait(Payload),
}

pub(crate) type Body = Coroutine<Payload, YieldMsg, Payload, DefaultStack>;

/// Something a coroutine can be parked on: a [`crate::mutex::Comutex`] or a
/// [`crate::condvar::Cocondition`]. `terminate` uses this to unlink a
/// forcibly-killed coroutine from whatever it was blocked on without the
/// caller having to know which kind of primitive it was (spec.md §4.8
/// "Cancellation").
pub trait Waitable {
    /// Current owner, for mutex wait-graph traversal. Conditions never
    /// participate in deadlock chains (spec.md §4.7), so they return `None`.
    fn owner(&self) -> Option<CoroutineId> {
        None
    }
    /// Remove `id` from this primitive's waiter queue without resuming it.
    fn unlink(&self, id: CoroutineId);
}

/// One arena slot: the coroutine's identity, lifecycle bookkeeping, its
/// corosensei body (or stashed spare stack, once reclaimed), and the
/// wait-graph links `terminate`/`deadlocked` walk.
pub(crate) struct Slot {
    pub guard_head: u32,
    pub guard_tail: u32,
    pub app_id: u64,
    pub state: CoroutineState,
    pub name: Option<String>,
    pub body: Option<Body>,
    pub spare_stack: Option<DefaultStack>,
    pub blocking_comutex: Option<Rc<dyn Waitable>>,
    pub blocking_cocondition: Option<Rc<dyn Waitable>>,
    pub generation: u32,
    pub last_yield_was_wait: bool,
    /// This coroutine's own mailbox (spec.md §3 "Coroutine" — "Inbox: a
    /// message-queue owning zero or more messages"). Replaced with a fresh,
    /// empty queue whenever the slot is (re)born or its occupant
    /// completes/terminates, so a reused slot never inherits a predecessor's
    /// stale messages.
    pub inbox: Rc<MessageQueue>,
    /// The coroutine's `&Yielder` pointer, captured once on its first
    /// resume (when the entry closure actually runs) and reused on every
    /// later resume, since corosensei only invokes the entry closure a
    /// single time — it suspends and resumes from inside that one call via
    /// `Yielder::suspend`, so the pointer never changes afterwards.
    pub yielder_ptr: *const (),
}

impl Slot {
    pub fn fresh(generation: u32) -> Self {
        Slot {
            guard_head: GUARD_VALUE,
            guard_tail: GUARD_VALUE,
            app_id: ID_NOT_SET,
            state: CoroutineState::NotRunning,
            name: None,
            body: None,
            spare_stack: None,
            blocking_comutex: None,
            blocking_cocondition: None,
            generation,
            last_yield_was_wait: false,
            yielder_ptr: std::ptr::null(),
            inbox: MessageQueue::new(),
        }
    }

    /// `true` once both guard words still hold [`GUARD_VALUE`]; the runtime
    /// checks this on every resume to detect stack-overflow corruption
    /// (spec.md §8, testable property "corruption detection").
    pub fn guards_intact(&self) -> bool {
        self.guard_head == GUARD_VALUE && self.guard_tail == GUARD_VALUE
    }
}
