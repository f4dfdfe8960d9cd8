//! Deadlock detection over the `Comutex` ownership wait-graph (spec.md §4.7).
//!
//! No teacher counterpart (the teacher has no mutex-ownership graph to walk
//! at all); this is a direct DFS cycle search along `blocking_comutex ->
//! owner -> blocking_comutex -> ...` edges, per spec.md §4.7's note that
//! condition-variable edges are deliberately not followed (a coroutine
//! parked on a `Cocondition` is not "owned" by anyone, so it can't itself be
//! the middle of a mutex cycle — only an innocent bystander warned about one).

use std::collections::HashSet;

use crate::coroutine::CoroutineId;
use crate::error::CoroResult;
use crate::scheduler;

/// `true` if following the chain of mutexes `c` (transitively) waits on
/// leads back into a cycle — i.e. `c` can never be resumed because it is
/// waiting, directly or indirectly, on itself.
pub fn deadlocked(c: CoroutineId) -> CoroResult<bool> {
    let mut current = c;
    let mut visited = HashSet::new();
    loop {
        if !visited.insert(current) {
            return Ok(true);
        }
        let owner = match scheduler::blocking_comutex(current)? {
            Some(w) => w.owner(),
            None => None,
        };
        match owner {
            Some(next) => current = next,
            None => return Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::coroutine::pack;
    use crate::error::ResumeOutcome;
    use crate::mutex::{Comutex, ComutexMode};
    use crate::options::Options;
    use crate::scheduler;

    fn reset() {
        scheduler::configure(Options::new()).unwrap();
    }

    #[test]
    fn unblocked_coroutine_is_not_deadlocked() {
        reset();
        assert!(!deadlocked(scheduler::root()).unwrap());
    }

    #[test]
    fn two_coroutines_locking_in_opposite_order_deadlock() {
        reset();
        let a_mutex = Comutex::new(ComutexMode::PLAIN);
        let b_mutex = Comutex::new(ComutexMode::PLAIN);

        let (am, bm) = (a_mutex.clone(), b_mutex.clone());
        let coro_a = Builder::new()
            .spawn(move |input| {
                am.lock().unwrap();
                scheduler::yield_value(pack(())).unwrap();
                bm.lock().unwrap();
                bm.unlock().unwrap();
                am.unlock().unwrap();
                input
            })
            .unwrap();
        let (am2, bm2) = (a_mutex.clone(), b_mutex.clone());
        let coro_b = Builder::new()
            .spawn(move |input| {
                bm2.lock().unwrap();
                scheduler::yield_value(pack(())).unwrap();
                am2.lock().unwrap();
                am2.unlock().unwrap();
                bm2.unlock().unwrap();
                input
            })
            .unwrap();

        // Each coroutine grabs its own mutex, then yields before trying for
        // the other one.
        assert!(matches!(scheduler::resume(coro_a, pack(())).unwrap(), ResumeOutcome::Yielded(_)));
        assert!(matches!(scheduler::resume(coro_b, pack(())).unwrap(), ResumeOutcome::Yielded(_)));
        assert!(!deadlocked(coro_a).unwrap());

        // Now each tries for the mutex the other holds: classic deadlock.
        assert!(matches!(scheduler::resume(coro_a, pack(())).unwrap(), ResumeOutcome::Wait));
        assert!(matches!(scheduler::resume(coro_b, pack(())).unwrap(), ResumeOutcome::Wait));
        assert!(deadlocked(coro_a).unwrap());
        assert!(deadlocked(coro_b).unwrap());
    }
}
