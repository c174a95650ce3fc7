//! Stress tests: many cycles, random batch shapes, concurrent dispatchers.

use crate::{
    handler_fn, reducer_fn, BatchOutcome, CycleId, Dispatch, EffectFailure, EffectReporter,
    EffectStore, Emit, ManualScheduler,
};
use anyhow::bail;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Planned {
    cycle: usize,
    index: usize,
    fails: bool,
}

#[derive(Default)]
struct Tally {
    failed: AtomicUsize,
    batches: AtomicUsize,
}

impl EffectReporter<Planned> for Arc<Tally> {
    fn effect_failed(&self, _failure: &EffectFailure<'_, Planned>) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn batch_performed(&self, _outcome: &BatchOutcome) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cycle ids of performed batches, in the order they were performed.
#[derive(Clone, Default)]
struct CycleOrder(Arc<Mutex<Vec<CycleId>>>);

impl<E: crate::Effect> EffectReporter<E> for CycleOrder {
    fn effect_failed(&self, _failure: &EffectFailure<'_, E>) {}

    fn batch_performed(&self, outcome: &BatchOutcome) {
        self.0.lock().unwrap().push(outcome.cycle);
    }
}

impl CycleOrder {
    fn assert_increasing(&self, expected: usize) {
        let cycles = self.0.lock().unwrap();
        assert_eq!(cycles.len(), expected);
        let inversions = cycles.windows(2).filter(|w| w[0] >= w[1]).count();
        assert_eq!(inversions, 0, "batches performed out of commit order");
    }
}

#[test]
fn random_batches_run_in_order_with_failures_isolated() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let scheduler = ManualScheduler::new();
    let tally = Arc::new(Tally::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();

    let store = EffectStore::builder(0usize)
        .with_reducer(reducer_fn(
            |n: &usize, plan: &Vec<Planned>, emit: &Emit<Planned>| {
                for effect in plan {
                    emit.emit(effect.clone());
                }
                Ok(n + 1)
            },
        ))
        .with_handler(handler_fn(move |effect: &Planned, _: &Dispatch<Vec<Planned>>| {
            handler_log
                .lock()
                .unwrap()
                .push((effect.cycle, effect.index));
            if effect.fails {
                bail!("planned failure at {}:{}", effect.cycle, effect.index);
            }
            Ok(())
        }))
        .with_reporter(tally.clone())
        .with_scheduler(scheduler.clone())
        .build()
        .unwrap();

    let mut expected = Vec::new();
    let mut expected_failures = 0;
    for cycle in 0..200 {
        let count = rng.usize(0..8);
        let plan: Vec<Planned> = (0..count)
            .map(|index| Planned {
                cycle,
                index,
                fails: rng.u8(0..10) == 0,
            })
            .collect();
        expected.extend(plan.iter().map(|p| (p.cycle, p.index)));
        expected_failures += plan.iter().filter(|p| p.fails).count();

        store.dispatch(plan).unwrap();

        // Interleave turns with dispatches now and then.
        if rng.bool() {
            scheduler.turn();
        }
    }
    scheduler.run_until_idle();

    assert_eq!(store.state(), 200);
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(tally.failed.load(Ordering::SeqCst), expected_failures);
    assert_eq!(tally.batches.load(Ordering::SeqCst), 200);
    assert_eq!(store.pending_effects(), 0);
}

#[test]
fn transition_failures_interleaved_with_successes() {
    let mut rng = fastrand::Rng::with_seed(42);
    let scheduler = ManualScheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler_log = log.clone();

    let store = EffectStore::builder(0u32)
        .with_reducer(reducer_fn(|n: &u32, action: &(u32, bool), emit: &Emit<u32>| {
            let (id, refuse) = *action;
            emit.emit(id);
            if refuse {
                bail!("refused {id}");
            }
            Ok(n + 1)
        }))
        .with_handler(handler_fn(move |id: &u32, _: &Dispatch<(u32, bool)>| {
            handler_log.lock().unwrap().push(*id);
            Ok(())
        }))
        .with_scheduler(scheduler.clone())
        .build()
        .unwrap();

    let mut committed = Vec::new();
    for id in 0..500 {
        let refuse = rng.u8(0..4) == 0;
        let result = store.dispatch((id, refuse));
        assert_eq!(result.is_err(), refuse);
        if !refuse {
            committed.push(id);
        }
    }
    scheduler.run_until_idle();

    assert_eq!(store.state() as usize, committed.len());
    assert_eq!(*log.lock().unwrap(), committed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatchers_each_see_their_effects_once_in_order() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 100;

    let seen: Arc<Mutex<HashMap<usize, Vec<usize>>>> = Arc::default();
    let handler_seen = seen.clone();
    let order = CycleOrder::default();

    let store = EffectStore::builder(0usize)
        .with_reducer(reducer_fn(
            |n: &usize, action: &(usize, usize), emit: &Emit<(usize, usize)>| {
                emit.emit(*action);
                Ok(n + 1)
            },
        ))
        .with_handler(handler_fn(
            move |&(thread, seq): &(usize, usize), _: &Dispatch<(usize, usize)>| {
                handler_seen
                    .lock()
                    .unwrap()
                    .entry(thread)
                    .or_default()
                    .push(seq);
                Ok(())
            },
        ))
        .with_reporter(order.clone())
        .build()
        .unwrap();

    let mut workers = Vec::new();
    for thread in 0..THREADS {
        let dispatch = store.dispatcher();
        workers.push(tokio::task::spawn_blocking(move || {
            for seq in 0..PER_THREAD {
                dispatch.dispatch((thread, seq)).unwrap();
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(10), store.settled())
        .await
        .expect("effects settle");

    assert_eq!(store.state(), THREADS * PER_THREAD);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), THREADS);
    for seqs in seen.values() {
        assert_eq!(*seqs, (0..PER_THREAD).collect::<Vec<_>>());
    }
    order.assert_increasing(THREADS * PER_THREAD);
}

#[test]
fn batches_from_racing_threads_keep_commit_order() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2000;

    let scheduler = ManualScheduler::new();
    let order = CycleOrder::default();
    let store = EffectStore::builder(0usize)
        .with_reducer(reducer_fn(|n: &usize, _: &usize, emit: &Emit<usize>| {
            emit.emit(*n);
            Ok(n + 1)
        }))
        .with_handler(handler_fn(|_: &usize, _: &Dispatch<usize>| Ok(())))
        .with_reporter(order.clone())
        .with_scheduler(scheduler.clone())
        .build()
        .unwrap();

    let workers: Vec<_> = (0..THREADS)
        .map(|thread| {
            let dispatch = store.dispatcher();
            std::thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    dispatch.dispatch(thread).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(scheduler.run_until_idle(), THREADS * PER_THREAD);
    order.assert_increasing(THREADS * PER_THREAD);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listeners_see_the_state_of_their_own_commit() {
    const DISPATCHES: u64 = 5000;

    // Every commit adds a distinct amount, so every committed state is unique.
    // Handlers dispatch too, racing the listener of the cycle that
    // scheduled them.
    let store = EffectStore::builder(0u64)
        .with_reducer(reducer_fn(|total: &u64, amount: &u64, emit: &Emit<u64>| {
            if *amount < 1_000_000 {
                emit.emit(amount + 1_000_000);
            }
            Ok(total + amount)
        }))
        .with_handler(handler_fn(|amount: &u64, dispatch: &Dispatch<u64>| {
            dispatch.dispatch(*amount)?;
            Ok(())
        }))
        .build()
        .unwrap();

    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let listener_snapshots = snapshots.clone();
    store.subscribe(move |total| listener_snapshots.lock().unwrap().push(*total));

    let dispatch = store.dispatcher();
    tokio::task::spawn_blocking(move || {
        for amount in 1..=DISPATCHES {
            dispatch.dispatch(amount).unwrap();
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(10), store.settled())
        .await
        .expect("effects settle");

    let mut snapshots = snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.len() as u64, DISPATCHES * 2);
    snapshots.sort_unstable();
    let before = snapshots.len();
    snapshots.dedup();
    assert_eq!(snapshots.len(), before, "a listener saw a later commit");
    assert_eq!(snapshots.last().copied(), Some(store.state()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn long_dispatch_chains_settle() {
    let store = EffectStore::builder(Vec::<u32>::new())
        .with_reducer(reducer_fn(|trail: &Vec<u32>, n: &u32, emit: &Emit<u32>| {
            if *n > 0 {
                emit.emit(n - 1);
            }
            let mut trail = trail.clone();
            trail.push(*n);
            Ok(trail)
        }))
        .with_handler(handler_fn(|next: &u32, dispatch: &Dispatch<u32>| {
            let dispatch = dispatch.clone();
            let next = *next;
            dispatch.clone().spawn(async move {
                tokio::time::sleep(Duration::from_micros(50)).await;
                dispatch.dispatch(next)?;
                Ok(())
            })?;
            Ok(())
        }))
        .build()
        .unwrap();

    store.dispatch(300).unwrap();
    tokio::time::timeout(Duration::from_secs(10), store.settled())
        .await
        .expect("chain settles");

    let trail = store.state();
    assert_eq!(trail.len(), 301);
    assert_eq!(trail, (0..=300).rev().collect::<Vec<_>>());
    assert_eq!(store.pending_effects(), 0);
}
