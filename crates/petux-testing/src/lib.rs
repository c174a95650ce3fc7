//! Testing utilities for petux effect stores.
//!
//! - [`RecordingHandler`] records every effect it is asked to perform and can
//!   be told to fail some of them.
//! - [`RecordingReporter`] keeps effect failures and batch sizes for assertions.
//! - [`capture_emits`] runs a reducer once, outside any store, and returns
//!   what it emitted.
//! - [`TestHarness`] wires those into an [`EffectStore`] driven by a
//!   [`ManualScheduler`], so a test decides when effects run.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};
use petux_core::{
    Action, BatchOutcome, CycleId, Dispatch, Effect, EffectFailure, EffectReporter, EffectStore,
    EffectsConfig, Emit, Handler, ManualScheduler, PetuxError, Reducer,
};
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type FailWhen<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// A handler that records effects instead of performing them.
///
/// Clones share one log.
pub struct RecordingHandler<E> {
    performed: Arc<Mutex<Vec<E>>>,
    fail_when: Option<FailWhen<E>>,
}

impl<E> Clone for RecordingHandler<E> {
    fn clone(&self) -> Self {
        Self {
            performed: self.performed.clone(),
            fail_when: self.fail_when.clone(),
        }
    }
}

impl<E> Default for RecordingHandler<E> {
    fn default() -> Self {
        Self {
            performed: Arc::default(),
            fail_when: None,
        }
    }
}

impl<E: Clone> RecordingHandler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every effect matching `predicate`. Failed effects are still
    /// recorded.
    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Arc::new(predicate));
        self
    }

    /// Every effect seen so far, in the order performed.
    pub fn performed(&self) -> Vec<E> {
        lock(&self.performed).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.performed).len()
    }

    pub fn clear(&self) {
        lock(&self.performed).clear();
    }
}

impl<A, E> Handler<A, E> for RecordingHandler<E>
where
    A: 'static,
    E: Effect + Clone,
{
    fn perform(&self, effect: &E, _dispatch: &Dispatch<A>) -> Result<()> {
        lock(&self.performed).push(effect.clone());
        if let Some(fail_when) = &self.fail_when {
            if fail_when(effect) {
                bail!("recording handler refused {effect:?}");
            }
        }
        Ok(())
    }
}

impl<E> fmt::Debug for RecordingHandler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("performed", &lock(&self.performed).len())
            .field("fails", &self.fail_when.is_some())
            .finish()
    }
}

/// One failure as seen by a [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFailure {
    pub cycle: CycleId,
    pub index: usize,
    /// `Debug` rendering of the effect.
    pub effect: String,
    /// `Display` rendering of the outcome.
    pub outcome: String,
}

#[derive(Debug, Default)]
struct Reports {
    failures: Vec<RecordedFailure>,
    batches: Vec<(CycleId, usize)>,
}

/// A reporter that keeps everything it is told. Clones share one record.
#[derive(Debug, Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Reports>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<RecordedFailure> {
        lock(&self.reports).failures.clone()
    }

    /// `(cycle, effects attempted)` for every performed batch, in order.
    pub fn batches(&self) -> Vec<(CycleId, usize)> {
        lock(&self.reports).batches.clone()
    }
}

impl<E: Effect> EffectReporter<E> for RecordingReporter {
    fn effect_failed(&self, failure: &EffectFailure<'_, E>) {
        lock(&self.reports).failures.push(RecordedFailure {
            cycle: failure.cycle,
            index: failure.index,
            effect: format!("{:?}", failure.effect),
            outcome: failure.outcome.to_string(),
        });
    }

    fn batch_performed(&self, outcome: &BatchOutcome) {
        lock(&self.reports)
            .batches
            .push((outcome.cycle, outcome.outcomes.len()));
    }
}

/// Run `reducer` once against `state` and return the new state together
/// with every effect it emitted, in order.
///
/// ```
/// use petux_core::{reducer_fn, Emit};
/// use petux_testing::capture_emits;
///
/// let reducer = reducer_fn(|n: &u32, by: &u32, emit: &Emit<String>| {
///     emit.emit(format!("add {by}"));
///     Ok(n + by)
/// });
/// let (next, effects) = capture_emits(&reducer, &1, &2);
/// assert_eq!(next.unwrap(), 3);
/// assert_eq!(effects, vec!["add 2".to_string()]);
/// ```
pub fn capture_emits<S, A, E, R>(reducer: &R, state: &S, action: &A) -> (Result<S>, Vec<E>)
where
    E: Send + 'static,
    R: Reducer<S, A, E>,
{
    let captured: Arc<Mutex<Vec<E>>> = Arc::default();
    let sink = captured.clone();
    let emit = Emit::from_fn(move |effect: E| lock(&sink).push(effect));
    let result = reducer.reduce(state, action, &emit);
    drop(emit);
    let effects = std::mem::take(&mut *lock(&captured));
    (result, effects)
}

/// An effect store with a recording handler and a manual scheduler.
///
/// Dispatch, then call [`run_effects`](TestHarness::run_effects) to perform
/// whatever has been scheduled.
pub struct TestHarness<S, A, E> {
    store: EffectStore<S, A, E>,
    scheduler: ManualScheduler,
    handler: RecordingHandler<E>,
    reporter: RecordingReporter,
}

impl<S, A, E> TestHarness<S, A, E>
where
    S: Clone + Send + 'static,
    A: Action,
    E: Effect + Clone,
{
    pub fn new<R>(initial: S, reducer: R) -> Result<Self, PetuxError>
    where
        R: Reducer<S, A, E>,
    {
        Self::with_handler(initial, reducer, RecordingHandler::new())
    }

    /// Use a preconfigured recording handler, e.g. one built with
    /// [`RecordingHandler::failing_when`].
    pub fn with_handler<R>(
        initial: S,
        reducer: R,
        handler: RecordingHandler<E>,
    ) -> Result<Self, PetuxError>
    where
        R: Reducer<S, A, E>,
    {
        let scheduler = ManualScheduler::new();
        let reporter = RecordingReporter::new();
        let store = EffectStore::builder(initial)
            .with_config(EffectsConfig::named("test-harness"))
            .with_reducer(reducer)
            .with_handler(handler.clone())
            .with_scheduler(scheduler.clone())
            .with_reporter(reporter.clone())
            .build()?;
        Ok(Self {
            store,
            scheduler,
            handler,
            reporter,
        })
    }

    pub fn dispatch(&self, action: A) -> Result<CycleId, PetuxError> {
        self.store.dispatch(action)
    }

    /// Perform scheduled batches until none are left. Returns how many ran.
    pub fn run_effects(&self) -> usize {
        let turns = self.scheduler.run_until_idle();
        debug!(turns, "test harness drained scheduler");
        turns
    }

    /// Dispatch and perform everything that follows from it.
    pub fn dispatch_and_settle(&self, action: A) -> Result<CycleId, PetuxError> {
        let cycle = self.dispatch(action)?;
        self.run_effects();
        Ok(cycle)
    }

    pub fn state(&self) -> S {
        self.store.state()
    }

    pub fn performed(&self) -> Vec<E> {
        self.handler.performed()
    }

    /// Batches waiting for a turn.
    pub fn pending_batches(&self) -> usize {
        self.scheduler.pending()
    }

    pub fn store(&self) -> &EffectStore<S, A, E> {
        &self.store
    }

    pub fn scheduler(&self) -> &ManualScheduler {
        &self.scheduler
    }

    pub fn reporter(&self) -> &RecordingReporter {
        &self.reporter
    }
}
