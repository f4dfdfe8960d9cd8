//! Error and sentinel-result types.
//!
//! The teacher (`coroutine_unique.rs`) threads a bare `ResumeResult<T> =
//! Result<T, Box<Any + Send>>` through its API. `cocoro` keeps the
//! `Result`-based shape but gives every spec'd failure mode (spec.md §7) its
//! own variant, and splits `resume`'s sentinel channel into a proper
//! `ResumeOutcome` enum instead of conflating it with the yielded value
//! (spec.md §9, "Sentinel return values from `resume`").

use std::fmt;

use crate::coroutine::Payload;

/// Failure modes surfaced by the public API (spec.md §7).
#[derive(Debug)]
pub enum CoroError {
    /// A required argument was null/absent (e.g. a null entry function).
    NullArgument(&'static str),
    /// `configure` was called with a different stack size than a prior call
    /// on this thread, after a child coroutine already exists.
    StackSizeMismatch { existing: usize, requested: usize },
    /// An operation requires `configure` to have run on this thread first.
    NotConfigured,
    /// `unlock` called by a coroutine that is not the current owner.
    UnlockNotOwner,
    /// `timedlock`/`timedwait` used on a primitive that wasn't built with
    /// timed support.
    NotTimed,
    /// `yield` called by the root coroutine (spec.md §4.3: "the calling
    /// coroutine must not be root").
    YieldFromRoot,
    /// A condition wait resumed without ever being signaled (e.g. the
    /// condition was torn down from under the waiter).
    InvalidWaitState,
    /// Allocation of a coroutine stack failed.
    NoMem,
    /// `send_to` addressed a thread id with no registered inbox (it never
    /// started, or has already exited).
    UnknownThread,
}

impl fmt::Display for CoroError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoroError::NullArgument(what) => write!(f, "null argument: {what}"),
            CoroError::StackSizeMismatch { existing, requested } => write!(
                f,
                "stack size {requested} conflicts with {existing} already fixed on this thread"
            ),
            CoroError::NotConfigured => write!(f, "scheduler not configured on this thread"),
            CoroError::UnlockNotOwner => write!(f, "unlock attempted by non-owner"),
            CoroError::NotTimed => write!(f, "mutex/condition does not support timed waits"),
            CoroError::YieldFromRoot => write!(f, "root coroutine cannot yield"),
            CoroError::InvalidWaitState => write!(f, "woke from wait without a pending signal"),
            CoroError::NoMem => write!(f, "failed to allocate coroutine stack"),
            CoroError::UnknownThread => write!(f, "send_to addressed an unregistered thread"),
        }
    }
}

impl std::error::Error for CoroError {}

pub type CoroResult<T> = Result<T, CoroError>;

/// What `resume` returned, with the out-of-band sentinels (spec.md §4.3)
/// split into their own variants rather than conflated with a legitimate
/// yielded value.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The coroutine called `yield` with ordinary (non-sentinel) flags.
    Yielded(Payload),
    /// The coroutine's entry function returned; it is now idle/reusable.
    Completed(Payload),
    /// The coroutine is suspended inside a blocking primitive (`WAIT`).
    Wait,
    /// The coroutine is suspended inside a timed blocking primitive
    /// (`TIMEDWAIT`).
    TimedWait,
    /// `c` was not on the call path of a suspended leaf (`NOT_RESUMABLE`).
    NotResumable,
    /// Guard-word corruption was detected on resume (`CORRUPT`).
    Corrupt,
}

/// Status codes mirrored from spec.md §7 for operations that don't need the
/// full `CoroError` machinery (trylock/timedlock/timedwait outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Busy,
    TimedOut,
}
