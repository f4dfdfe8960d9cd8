//! End-to-end scenarios exercising the public API together, matching the
//! literal behaviors the unit tests check in isolation: round-robin
//! scheduling over a shared mutex, condition-variable producer/consumer,
//! timed-lock timeout, broadcast wakeups, request/reply messaging, and
//! deadlock detection followed by recovery via `terminate`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use cocoro::coroutine::{pack, unpack};
use cocoro::error::{ResumeOutcome, Status};
use cocoro::mutex::{Comutex, ComutexMode};
use cocoro::{deadlocked, scheduler, thread, Builder, Cocondition, Message, Options, Waitable};

fn reset() {
    scheduler::configure(Options::new()).unwrap();
}

/// S1 — three coroutines share one counter and one mutex; each locks,
/// increments, unlocks only on an even count, yields, and repeats until the
/// counter reaches the target. Driven round-robin until all finish.
#[test]
fn s1_round_robin_three_counters_reach_target() {
    reset();
    const TARGET: i32 = 20_000;
    let counter = Rc::new(Cell::new(0));
    let mtx = Comutex::new(ComutexMode::PLAIN);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (c, m) = (counter.clone(), mtx.clone());
        let id = Builder::new()
            .spawn(move |_| {
                let mut held = false;
                let mut iterations = 0i32;
                loop {
                    if !held {
                        m.lock().unwrap();
                        held = true;
                    }
                    if c.get() >= TARGET {
                        m.unlock().unwrap();
                        return pack(iterations);
                    }
                    let v = c.get() + 1;
                    c.set(v);
                    iterations += 1;
                    if v % 2 == 0 {
                        m.unlock().unwrap();
                        held = false;
                    }
                    scheduler::yield_value(pack(())).unwrap();
                }
            })
            .unwrap();
        ids.push(id);
    }

    let outcomes = thread::run_round_robin(&ids, |_| pack(())).unwrap();
    let mut total = 0i32;
    for outcome in outcomes {
        match outcome.unwrap() {
            ResumeOutcome::Completed(v) => total += unpack::<i32>(v).unwrap(),
            other => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(counter.get(), TARGET);
    assert_eq!(total, TARGET);
    assert_eq!(mtx.owner(), None);
}

/// S2 — a producer pushes 1..=5 to a shared queue and signals; a consumer
/// `Cocondition::wait`s until all five have arrived, observing them in
/// order.
#[test]
fn s2_producer_consumer_observes_values_in_order() {
    reset();
    let queue = Rc::new(std::cell::RefCell::new(std::collections::VecDeque::new()));
    let mtx = Comutex::new(ComutexMode::PLAIN);
    let cond = Cocondition::new();

    let (q, m, c) = (queue.clone(), mtx.clone(), cond.clone());
    let consumer = Builder::new()
        .spawn(move |_| {
            let mut received = Vec::new();
            m.lock().unwrap();
            while received.len() < 5 {
                while q.borrow().is_empty() {
                    c.wait(&m).unwrap();
                }
                let v = q.borrow_mut().pop_front().unwrap();
                received.push(v);
            }
            m.unlock().unwrap();
            pack(received)
        })
        .unwrap();
    assert!(matches!(
        scheduler::resume(consumer, pack(())).unwrap(),
        ResumeOutcome::Wait
    ));

    for v in 1..=5 {
        mtx.lock().unwrap();
        queue.borrow_mut().push_back(v);
        cond.signal();
        mtx.unlock().unwrap();
        match scheduler::resume(consumer, pack(())).unwrap() {
            ResumeOutcome::Wait => {}
            ResumeOutcome::Completed(out) if v == 5 => {
                assert_eq!(unpack::<Vec<i32>>(out).unwrap(), vec![1, 2, 3, 4, 5]);
            }
            other => panic!("unexpected at v={v}: {other:?}"),
        }
    }
    assert_eq!(cond.waiter_count(), 0);
}

/// S3 — coroutine A holds a mutex indefinitely; coroutine B's `timedlock`
/// must time out within its bound, never granting ownership.
#[test]
fn s3_timedlock_times_out_within_bound() {
    reset();
    let mtx = Comutex::new(ComutexMode::PLAIN | ComutexMode::TIMED);
    mtx.trylock().unwrap(); // root (A's stand-in) holds it forever.

    let m = mtx.clone();
    let b = Builder::new()
        .spawn(move |_| pack(m.timedlock(Duration::from_millis(50)).unwrap()))
        .unwrap();
    let start = cocoro::clock::now_nanoseconds();
    assert!(matches!(
        scheduler::resume(b, pack(())).unwrap(),
        ResumeOutcome::TimedWait
    ));
    std::thread::sleep(Duration::from_millis(60));
    match scheduler::resume(b, pack(())).unwrap() {
        ResumeOutcome::Completed(v) => assert_eq!(unpack::<Status>(v).unwrap(), Status::TimedOut),
        other => panic!("unexpected: {other:?}"),
    }
    let elapsed_ms = (cocoro::clock::now_nanoseconds() - start) / 1_000_000;
    assert!(elapsed_ms >= 50, "timed out too early: {elapsed_ms}ms");
}

/// S4 — five coroutines wait on one condition; a single `broadcast` must
/// release every one of them.
#[test]
fn s4_broadcast_releases_all_five() {
    reset();
    let mtx = Comutex::new(ComutexMode::PLAIN);
    let cond = Cocondition::new();

    let mut waiters = Vec::new();
    for _ in 0..5 {
        let (m, c) = (mtx.clone(), cond.clone());
        let id = Builder::new()
            .spawn(move |input| {
                m.lock().unwrap();
                c.wait(&m).unwrap();
                m.unlock().unwrap();
                input
            })
            .unwrap();
        assert!(matches!(
            scheduler::resume(id, pack(())).unwrap(),
            ResumeOutcome::Wait
        ));
        waiters.push(id);
    }
    assert_eq!(cond.waiter_count(), 5);

    cond.broadcast();
    for id in waiters {
        match scheduler::resume(id, pack(())).unwrap() {
            ResumeOutcome::Completed(_) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(cond.waiter_count(), 0);
}

/// S5 — A (root) sends a request to coroutine B's own inbox with a reply
/// address; B `receive()`s it off that inbox and replies to A's inbox with a
/// different type tag; A's type-filtered `wait_for_reply_with_type` on its
/// own inbox must match the real reply and time out waiting for a type that
/// never comes.
#[test]
fn s5_request_reply_matches_by_type_and_sender() {
    reset();
    let a_id = scheduler::root();
    scheduler::set_id(a_id, 1).unwrap();

    const B_APP_ID: u64 = 2;
    let b_id = Builder::new()
        .spawn(move |_| {
            let msg = scheduler::receive(None).unwrap().unwrap();
            assert_eq!(msg.type_tag, 7);
            let payload: String = unpack(msg.payload).unwrap();
            assert_eq!(payload, "X");
            let reply_to = msg.reply_to.unwrap();
            reply_to.push(Message::new(9, pack("Y".to_string())).from(B_APP_ID)).unwrap();
            pack(())
        })
        .unwrap();
    scheduler::set_id(b_id, B_APP_ID).unwrap();

    let a_inbox = scheduler::inbox(a_id).unwrap();
    scheduler::send_to(
        b_id,
        Message::new(7, pack("X".to_string())).from(1).reply_to(a_inbox.clone()),
    )
    .unwrap();

    match scheduler::resume(b_id, pack(())).unwrap() {
        ResumeOutcome::Completed(_) => {}
        other => panic!("unexpected: {other:?}"),
    }

    let reply = a_inbox.wait_for_reply_with_type(B_APP_ID, 9, None).unwrap().unwrap();
    assert_eq!(reply.type_tag, 9);
    assert_eq!(unpack::<String>(reply.payload).unwrap(), "Y");

    // No type=8 reply was ever sent: a bounded wait for it times out.
    let timed_out = a_inbox
        .wait_for_reply_with_type(B_APP_ID, 8, Some(Duration::from_millis(10)))
        .unwrap();
    assert!(timed_out.is_none());
}

/// S6 — A locks M1 then blocks on M2; B locks M2 then blocks on M1: a
/// classic two-mutex deadlock. `terminate`ing A must hand M1 to B and let
/// it complete, leaving both mutexes unlocked.
#[test]
fn s6_deadlock_then_recovery_via_terminate() {
    reset();
    let m1 = Comutex::new(ComutexMode::PLAIN);
    let m2 = Comutex::new(ComutexMode::PLAIN);

    let (am1, bm2) = (m1.clone(), m2.clone());
    let coro_a = Builder::new()
        .spawn(move |input| {
            am1.lock().unwrap();
            scheduler::yield_value(pack(())).unwrap();
            bm2.lock().unwrap();
            bm2.unlock().unwrap();
            am1.unlock().unwrap();
            input
        })
        .unwrap();
    let (bm1, bm2b) = (m1.clone(), m2.clone());
    let coro_b = Builder::new()
        .spawn(move |input| {
            bm2b.lock().unwrap();
            scheduler::yield_value(pack(())).unwrap();
            bm1.lock().unwrap();
            bm1.unlock().unwrap();
            bm2b.unlock().unwrap();
            input
        })
        .unwrap();

    assert!(matches!(scheduler::resume(coro_a, pack(())).unwrap(), ResumeOutcome::Yielded(_)));
    assert!(matches!(scheduler::resume(coro_b, pack(())).unwrap(), ResumeOutcome::Yielded(_)));
    assert!(matches!(scheduler::resume(coro_a, pack(())).unwrap(), ResumeOutcome::Wait));
    assert!(matches!(scheduler::resume(coro_b, pack(())).unwrap(), ResumeOutcome::Wait));

    assert!(deadlocked(coro_a).unwrap());
    assert!(deadlocked(coro_b).unwrap());

    scheduler::terminate(coro_a, &[&*m1 as &dyn Waitable, &*m2 as &dyn Waitable]).unwrap();

    match scheduler::resume(coro_b, pack(())).unwrap() {
        ResumeOutcome::Completed(_) => {}
        other => panic!("unexpected: {other:?}"),
    }

    assert!(!deadlocked(coro_b).unwrap());
    assert_eq!(m1.owner(), None);
    assert_eq!(m2.owner(), None);
}
