//! The effect performer.
//!
//! Runs a captured batch through the handler, one effect at a time, in
//! emission order. Each effect gets an explicit [`EffectOutcome`]; failures
//! go to an [`EffectReporter`] and the next effect runs regardless.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::core::{CycleId, Effect};
use crate::dispatch::Dispatch;
use crate::handler::Handler;
use crate::sink::Batch;

/// What happened to one effect.
#[derive(Debug)]
pub enum EffectOutcome {
    /// The handler returned `Ok`.
    Performed,
    /// The handler returned an error.
    Failed(anyhow::Error),
    /// The handler panicked. Holds the panic message when it was a string.
    Panicked(String),
}

impl EffectOutcome {
    pub fn is_performed(&self) -> bool {
        matches!(self, EffectOutcome::Performed)
    }
}

impl fmt::Display for EffectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectOutcome::Performed => f.write_str("performed"),
            EffectOutcome::Failed(err) => write!(f, "failed: {err:#}"),
            EffectOutcome::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Outcomes for every effect of one batch, in emission order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub cycle: CycleId,
    pub outcomes: Vec<EffectOutcome>,
}

impl BatchOutcome {
    pub fn performed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_performed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.performed()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }
}

/// A failed effect, as handed to a reporter.
#[derive(Debug)]
pub struct EffectFailure<'a, E> {
    pub store: &'a str,
    pub cycle: CycleId,
    /// Position of the effect within its batch.
    pub index: usize,
    pub effect: &'a E,
    pub outcome: &'a EffectOutcome,
}

/// Receives effect failures and finished batches.
pub trait EffectReporter<E>: Send + Sync + 'static {
    fn effect_failed(&self, failure: &EffectFailure<'_, E>);

    fn batch_performed(&self, _outcome: &BatchOutcome) {}
}

/// Reports through `tracing`. The default reporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl<E: Effect> EffectReporter<E> for TracingReporter {
    fn effect_failed(&self, failure: &EffectFailure<'_, E>) {
        error!(
            store = %failure.store,
            cycle = %failure.cycle,
            index = failure.index,
            effect = ?failure.effect,
            outcome = %failure.outcome,
            "while performing an effect"
        );
    }

    fn batch_performed(&self, outcome: &BatchOutcome) {
        debug!(
            cycle = %outcome.cycle,
            performed = outcome.performed(),
            failed = outcome.failed(),
            "batch performed"
        );
    }
}

/// How the performer runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PerformOptions<'a> {
    pub(crate) store: &'a str,
    pub(crate) catch_panics: bool,
}

/// Perform every effect of `batch`, in order, isolating failures.
///
/// Never returns early and never propagates a handler failure.
pub(crate) fn perform_all<A, E>(
    batch: Batch<E>,
    handler: &dyn Handler<A, E>,
    dispatch: &Dispatch<A>,
    reporter: &dyn EffectReporter<E>,
    options: PerformOptions<'_>,
) -> BatchOutcome
where
    A: 'static,
    E: Effect,
{
    let cycle = batch.cycle();
    let mut outcomes = Vec::with_capacity(batch.len());

    for (index, effect) in batch.into_iter().enumerate() {
        let outcome = perform_one(handler, &effect, dispatch, options.catch_panics);
        if !outcome.is_performed() {
            reporter.effect_failed(&EffectFailure {
                store: options.store,
                cycle,
                index,
                effect: &effect,
                outcome: &outcome,
            });
        }
        outcomes.push(outcome);
    }

    let outcome = BatchOutcome { cycle, outcomes };
    reporter.batch_performed(&outcome);
    outcome
}

fn perform_one<A: 'static, E: Effect>(
    handler: &dyn Handler<A, E>,
    effect: &E,
    dispatch: &Dispatch<A>,
    catch_panics: bool,
) -> EffectOutcome {
    if !catch_panics {
        return into_outcome(handler.perform(effect, dispatch));
    }
    match panic::catch_unwind(AssertUnwindSafe(|| handler.perform(effect, dispatch))) {
        Ok(result) => into_outcome(result),
        Err(payload) => EffectOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn into_outcome(result: anyhow::Result<()>) -> EffectOutcome {
    match result {
        Ok(()) => EffectOutcome::Performed,
        Err(err) => EffectOutcome::Failed(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchTarget;
    use crate::error::PetuxError;
    use crate::schedule::InflightTracker;
    use anyhow::bail;
    use std::sync::{Arc, Mutex};

    struct NoStore(Arc<InflightTracker>);

    impl DispatchTarget<()> for NoStore {
        fn dispatch(&self, _: ()) -> Result<CycleId, PetuxError> {
            Ok(CycleId(0))
        }

        fn inflight(&self) -> &Arc<InflightTracker> {
            &self.0
        }

        fn name(&self) -> &str {
            "none"
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<(usize, u32, String)>>);

    impl EffectReporter<u32> for Collect {
        fn effect_failed(&self, failure: &EffectFailure<'_, u32>) {
            self.0
                .lock()
                .unwrap()
                .push((failure.index, *failure.effect, failure.outcome.to_string()));
        }
    }

    fn dispatch() -> Dispatch<()> {
        Dispatch::new(Arc::new(NoStore(InflightTracker::new())))
    }

    fn options(catch_panics: bool) -> PerformOptions<'static> {
        PerformOptions {
            store: "test",
            catch_panics,
        }
    }

    #[test]
    fn every_effect_is_attempted_once_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler_seen = seen.clone();
        let handler = move |e: &u32, _: &Dispatch<()>| -> anyhow::Result<()> {
            handler_seen.lock().unwrap().push(*e);
            if *e == 2 {
                bail!("two is unlucky");
            }
            if *e == 3 {
                panic!("three panics");
            }
            Ok(())
        };
        let reporter = Collect::default();

        let outcome = perform_all(
            Batch::new(CycleId(9), [1, 2, 3, 4]),
            &handler,
            &dispatch(),
            &reporter,
            options(true),
        );

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(outcome.cycle, CycleId(9));
        assert_eq!(outcome.performed(), 2);
        assert_eq!(outcome.failed(), 2);
        assert!(!outcome.is_clean());

        let failures = reporter.0.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, 1);
        assert_eq!(failures[0].1, 2);
        assert!(failures[0].2.contains("two is unlucky"));
        assert_eq!(failures[1].0, 2);
        assert_eq!(failures[1].2, "panicked: three panics");
    }

    #[test]
    fn empty_batch_performs_nothing() {
        let handler = |_: &u32, _: &Dispatch<()>| -> anyhow::Result<()> { panic!("not called") };
        let outcome = perform_all(
            Batch::new(CycleId(1), []),
            &handler,
            &dispatch(),
            &TracingReporter,
            options(true),
        );
        assert!(outcome.outcomes.is_empty());
        assert!(outcome.is_clean());
    }

    #[test]
    fn panics_propagate_when_not_caught() {
        let handler = |_: &u32, _: &Dispatch<()>| -> anyhow::Result<()> { panic!("boom") };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            perform_all(
                Batch::new(CycleId(1), [1]),
                &handler,
                &dispatch(),
                &TracingReporter,
                options(false),
            )
        }));
        assert!(result.is_err());
    }
}
