// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The per-thread scheduler: running/idle coroutine lists and the core
//! `configure`/`create`/`resume`/`yield`/`terminate` API (spec.md §3
//! "Lifecycle", §4.3 "Core API").
//!
//! Grounded on `coroutine_unique.rs`'s `thread_local!` `Environment` plus
//! `Coroutine::{spawn,resume,yield_now,current}`; `cocoro` keeps the same
//! thread-confined-state shape but backs the actual context switch with
//! `corosensei` instead of the teacher's hand-written assembly.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use corosensei::{Coroutine, CoroutineResult, Yielder};
use log::{debug, trace, warn};

use crate::builder::Builder;
use crate::coroutine::{
    pack, CoroutineId, CoroutineState, Payload, Slot, Waitable, YieldMsg,
};
use crate::error::{CoroError, CoroResult, ResumeOutcome};
use crate::message::{Message, MessageQueue};
use crate::options::Options;
use crate::stack;

struct State {
    slots: Vec<Slot>,
    idle: Vec<CoroutineId>,
    running: Vec<CoroutineId>,
    stack_size: usize,
    options: Options,
}

impl State {
    fn slot(&self, id: CoroutineId) -> CoroResult<&Slot> {
        let slot = self
            .slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or(CoroError::NotConfigured)?;
        Ok(slot)
    }

    fn slot_mut(&mut self, id: CoroutineId) -> CoroResult<&mut Slot> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .ok_or(CoroError::NotConfigured)?;
        Ok(slot)
    }
}

thread_local! {
    static STATE: RefCell<Option<State>> = const { RefCell::new(None) };
    /// Pointer to the `Yielder` of whichever coroutine is currently live on
    /// this OS thread's stack. Exactly one entry is live at a time because
    /// corosensei only ever runs one coroutine's stack per thread; nesting
    /// (A resumes B) pushes B's pointer for the duration of that single
    /// call and pops it the instant control returns to A. See
    /// `with_yielder_slot`/`yield_raw` below.
    static YIELDER_STACK: RefCell<Vec<*const ()>> = const { RefCell::new(Vec::new()) };
}

fn with_state<R>(f: impl FnOnce(&mut State) -> CoroResult<R>) -> CoroResult<R> {
    STATE.with(|cell| {
        let mut guard = cell.borrow_mut();
        let state = guard.as_mut().ok_or(CoroError::NotConfigured)?;
        f(state)
    })
}

/// Root id: slot 0, created by `configure`, permanently on the bottom of the
/// running stack, never given a corosensei body of its own (it *is* the
/// real OS thread's call stack).
const ROOT: CoroutineId = CoroutineId {
    index: 0,
    generation: 0,
};

/// Fix this thread's stack size and install the root coroutine
/// (spec.md §4.3 "configure"). Calling this again on a thread that already
/// has children is only valid if `options.stack_size` matches what was
/// configured before.
pub fn configure(options: Options) -> CoroResult<()> {
    STATE.with(|cell| {
        let mut guard = cell.borrow_mut();
        let size = stack::clamp(options.stack_size);
        if let Some(state) = guard.as_mut() {
            if state.stack_size != size && state.slots.len() > 1 {
                return Err(CoroError::StackSizeMismatch {
                    existing: state.stack_size,
                    requested: size,
                });
            }
            state.stack_size = size;
            state.options = options;
            return Ok(());
        }
        let mut root_slot = Slot::fresh(0);
        root_slot.state = CoroutineState::Running;
        *guard = Some(State {
            slots: vec![root_slot],
            idle: Vec::new(),
            running: vec![ROOT],
            stack_size: size,
            options,
        });
        debug!("scheduler configured: stack_size={size}");
        Ok(())
    })
}

/// Whether `configure` has run on this thread.
pub fn is_configured() -> bool {
    STATE.with(|cell| cell.borrow().is_some())
}

/// This thread's root coroutine id.
pub fn root() -> CoroutineId {
    ROOT
}

/// The coroutine currently at the top of the running stack (spec.md §3
/// "running stack"): the root if nothing else is executing.
pub fn running() -> CoroResult<CoroutineId> {
    with_state(|s| Ok(*s.running.last().unwrap_or(&ROOT)))
}

/// Create a new coroutine, reusing an idle slot (and its stashed stack, if
/// any) when one is available (spec.md §4.2 "birthing new idle coroutine").
pub fn create<F>(builder: Builder, entry: F) -> CoroResult<CoroutineId>
where
    F: FnOnce(Payload) -> Payload + 'static,
{
    let (name, requested_size) = builder.into_parts();
    let id = with_state(|state| {
        if let Some(requested) = requested_size {
            let clamped = stack::clamp(requested);
            if clamped != state.stack_size {
                return Err(CoroError::StackSizeMismatch {
                    existing: state.stack_size,
                    requested: clamped,
                });
            }
        }

        // Reuse an idle slot (and its stashed stack memory, if any) or
        // grow the arena with a fresh one (spec.md §4.2 "birthing new idle
        // coroutine"). Reusing a slot bumps its generation so stale handles
        // to the coroutine that previously lived there can't alias this one.
        let id = match state.idle.pop() {
            Some(old) => {
                let slot = state.slot_mut(old)?;
                slot.generation = slot.generation.wrapping_add(1);
                CoroutineId {
                    index: old.index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = state.slots.len() as u32;
                state.slots.push(Slot::fresh(0));
                CoroutineId { index, generation: 0 }
            }
        };

        let stack = {
            let slot = state.slot_mut(id)?;
            match slot.spare_stack.take() {
                Some(s) => s,
                None => stack::allocate(state.stack_size)?,
            }
        };

        let body = Coroutine::with_stack(stack, move |yielder, first_input: Payload| {
            with_yielder_slot(|slot| *slot = yielder as *const Yielder<Payload, YieldMsg> as *const ());
            entry(first_input)
        });

        let slot = state.slot_mut(id)?;
        slot.body = Some(body);
        slot.name = name;
        slot.state = CoroutineState::NotRunning;
        slot.blocking_comutex = None;
        slot.blocking_cocondition = None;
        slot.last_yield_was_wait = false;
        slot.yielder_ptr = std::ptr::null();
        slot.inbox = MessageQueue::new();
        Ok::<_, CoroError>(id)
    })?;

    STATE.with(|cell| {
        if let Some(state) = cell.borrow().as_ref() {
            if let Some(cb) = state.options.on_create.as_ref() {
                cb(id);
            }
        }
    });
    trace!("coroutine created: {id:?}");
    Ok(id)
}

/// Push a fresh yielder slot, run `f` to fill it in, leaving it on the stack
/// for the duration of the surrounding `resume` call.
fn with_yielder_slot(f: impl FnOnce(&mut *const ())) {
    YIELDER_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let slot = stack.last_mut().expect("yielder slot must be pushed by resume");
        f(slot);
    });
}

/// Resume a coroutine with `arg` as its next input (spec.md §4.3 "resume").
pub fn resume(id: CoroutineId, arg: Payload) -> CoroResult<ResumeOutcome> {
    let mut body = with_state(|state| {
        let slot = state.slot_mut(id)?;
        if !slot.guards_intact() {
            warn!("guard word corruption detected resuming {id:?}");
            return Ok(None);
        }
        if slot.state == CoroutineState::Running {
            return Ok(None);
        }
        Ok(slot.body.take())
    })?;

    let Some(mut body) = body.take() else {
        let corrupt = with_state(|state| Ok(!state.slot(id)?.guards_intact()))?;
        return Ok(if corrupt {
            ResumeOutcome::Corrupt
        } else {
            ResumeOutcome::NotResumable
        });
    };

    let persisted = with_state(|state| {
        let slot = state.slot_mut(id)?;
        slot.state = CoroutineState::Running;
        Ok(slot.yielder_ptr)
    })?;
    with_state(|state| {
        state.running.push(id);
        Ok(())
    })?;
    YIELDER_STACK.with(|stack| stack.borrow_mut().push(persisted));

    trace!("resuming {id:?}");
    let result = body.resume(arg);

    let captured = YIELDER_STACK.with(|stack| stack.borrow_mut().pop().unwrap());
    with_state(|state| {
        state.running.pop();
        if persisted.is_null() && !captured.is_null() {
            state.slot_mut(id)?.yielder_ptr = captured;
        }
        Ok(())
    })?;

    match result {
        CoroutineResult::Yield(YieldMsg::Plain(v)) => {
            with_state(|state| {
                let slot = state.slot_mut(id)?;
                slot.body = Some(body);
                slot.state = CoroutineState::NotRunning;
                slot.last_yield_was_wait = false;
                Ok(())
            })?;
            Ok(ResumeOutcome::Yielded(v))
        }
        CoroutineResult::Yield(YieldMsg::Wait(v)) => {
            with_state(|state| {
                let slot = state.slot_mut(id)?;
                slot.body = Some(body);
                slot.state = CoroutineState::Blocked;
                slot.last_yield_was_wait = true;
                Ok(())
            })?;
            let _ = v;
            Ok(ResumeOutcome::Wait)
        }
        CoroutineResult::Yield(YieldMsg::TimedWait(v)) => {
            with_state(|state| {
                let slot = state.slot_mut(id)?;
                slot.body = Some(body);
                slot.state = CoroutineState::Blocked;
                slot.last_yield_was_wait = true;
                Ok(())
            })?;
            let _ = v;
            Ok(ResumeOutcome::TimedWait)
        }
        CoroutineResult::Return(v) => {
            let stashed_stack = body.into_stack();
            with_state(|state| {
                let slot = state.slot_mut(id)?;
                slot.state = CoroutineState::NotRunning;
                slot.spare_stack = Some(stashed_stack);
                slot.blocking_comutex = None;
                slot.blocking_cocondition = None;
                slot.inbox = MessageQueue::new();
                state.idle.push(id);
                if let Some(cb) = state.options.on_terminate.as_ref() {
                    cb(id);
                }
                Ok(())
            })?;
            debug!("coroutine completed: {id:?}");
            Ok(ResumeOutcome::Completed(v))
        }
    }
}

/// Called from inside a running coroutine's entry function to suspend and
/// hand `value` to whoever resumes it next (spec.md §4.3 "yield").
pub fn yield_value(value: Payload) -> CoroResult<Payload> {
    yield_raw(YieldMsg::Plain(value))
}

/// Crate-internal: yield tagged as `WAIT`/`TIMEDWAIT` so `resume` reports
/// the matching `ResumeOutcome` sentinel instead of an ordinary yield
/// (spec.md §9 "split the return channel").
pub(crate) fn yield_wait(value: Payload) -> Payload {
    yield_raw(YieldMsg::Wait(value)).unwrap_or_else(|_| pack(()))
}

pub(crate) fn yield_timedwait(value: Payload) -> Payload {
    yield_raw(YieldMsg::TimedWait(value)).unwrap_or_else(|_| pack(()))
}

fn yield_raw(msg: YieldMsg) -> CoroResult<Payload> {
    if running()? == ROOT {
        return Err(CoroError::YieldFromRoot);
    }
    let ptr = YIELDER_STACK.with(|stack| {
        *stack
            .borrow()
            .last()
            .expect("yield called outside any coroutine body")
    });
    assert!(!ptr.is_null(), "yield called before coroutine body started");
    // SAFETY: `ptr` was set by `with_yielder_slot` to the `&Yielder` that
    // corosensei handed this coroutine's entry closure; it stays valid for
    // exactly the dynamic extent of the `resume` call currently executing
    // this coroutine's stack, which is the only window `yield_raw` can run
    // in (it's only reachable from code running on that same stack).
    let yielder: &Yielder<Payload, YieldMsg> = unsafe { &*(ptr as *const Yielder<Payload, YieldMsg>) };
    Ok(yielder.suspend(msg))
}

/// Application-level id attached to a coroutine via [`set_id`], or
/// [`crate::coroutine::ID_NOT_SET`] if never assigned.
pub fn id(c: CoroutineId) -> CoroResult<u64> {
    with_state(|s| Ok(s.slot(c)?.app_id))
}

pub fn set_id(c: CoroutineId, app_id: u64) -> CoroResult<()> {
    with_state(|s| {
        s.slot_mut(c)?.app_id = app_id;
        Ok(())
    })
}

pub fn state(c: CoroutineId) -> CoroResult<CoroutineState> {
    with_state(|s| Ok(s.slot(c)?.state))
}

/// `c`'s own mailbox (spec.md §3 "Coroutine"), for callers that want the
/// full `MessageQueue` surface (`peek`/`pop_type`/`wait_for_reply`, ...)
/// rather than just [`send_to`]/[`receive`].
pub fn inbox(c: CoroutineId) -> CoroResult<Rc<MessageQueue>> {
    with_state(|s| Ok(s.slot(c)?.inbox.clone()))
}

/// Route `msg` to `c`'s inbox (spec.md §4.6 "Per-coroutine inbox").
pub fn send_to(c: CoroutineId, msg: Message) -> CoroResult<()> {
    inbox(c)?.push(msg)
}

/// Block the running coroutine until a message lands in its own inbox, or
/// `timeout` elapses (spec.md §4.6 "Per-coroutine inbox" — "`receive()`
/// ... waits on `running()`'s inbox").
pub fn receive(timeout: Option<Duration>) -> CoroResult<Option<Message>> {
    inbox(running()?)?.wait(timeout)
}

pub(crate) fn set_blocking_comutex(c: CoroutineId, w: Option<Rc<dyn Waitable>>) -> CoroResult<()> {
    with_state(|s| {
        s.slot_mut(c)?.blocking_comutex = w;
        Ok(())
    })
}

pub(crate) fn set_blocking_cocondition(c: CoroutineId, w: Option<Rc<dyn Waitable>>) -> CoroResult<()> {
    with_state(|s| {
        s.slot_mut(c)?.blocking_cocondition = w;
        Ok(())
    })
}

pub(crate) fn blocking_comutex(c: CoroutineId) -> CoroResult<Option<Rc<dyn Waitable>>> {
    with_state(|s| Ok(s.slot(c)?.blocking_comutex.clone()))
}

/// Forcibly kill `c`, unlinking it from whatever mutexes/conditions it was
/// blocked on and releasing any of `mutexes` it still owned
/// (spec.md §4.8 "Cancellation"). Callers must pass the full set of
/// Comutexes `c` might hold, matching the original's contract.
pub fn terminate(c: CoroutineId, mutexes: &[&dyn Waitable]) -> CoroResult<()> {
    if c == ROOT {
        return Err(CoroError::NotConfigured);
    }
    let (comutex, cocondition, body) = with_state(|state| {
        let running_pos = state.running.iter().position(|&r| r == c);
        if let Some(pos) = running_pos {
            state.running.remove(pos);
        }
        let slot = state.slot_mut(c)?;
        let body = slot.body.take();
        let comutex = slot.blocking_comutex.take();
        let cocondition = slot.blocking_cocondition.take();
        slot.state = CoroutineState::NotRunning;
        Ok((comutex, cocondition, body))
    })?;

    for m in mutexes {
        if m.owner() == Some(c) {
            m.unlink(c);
        }
    }
    if let Some(w) = comutex {
        w.unlink(c);
    }
    if let Some(w) = cocondition {
        w.unlink(c);
    }

    let spare = body.map(|mut b| {
        if !b.done() {
            b.force_unwind();
        }
        b.into_stack()
    });

    with_state(|state| {
        let slot = state.slot_mut(c)?;
        slot.spare_stack = spare;
        slot.inbox = MessageQueue::new();
        state.idle.push(c);
        if let Some(cb) = state.options.on_terminate.as_ref() {
            cb(c);
        }
        Ok(())
    })?;
    debug!("coroutine terminated: {c:?}");
    Ok(())
}
