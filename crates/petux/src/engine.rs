//! The effect store: a [`Store`] wrapped so every dispatch runs a cycle.
//!
//! ```text
//! dispatch(action)
//!     │
//!     ├─ OPEN      sink ← new queue
//!     ├─ RUN       store.commit(action)   reducer calls emit(effect)*
//!     │              └─ Err → drop queue, sink ← Discard, return Err
//!     ├─ CLOSE     batch ← queue, sink ← Discard
//!     ├─ SCHEDULE  scheduler ← perform_all(batch)
//!     └─ notify listeners
//!
//! later turn: perform_all(batch) → handler(effect, dispatch) per effect
//!                                    └─ may dispatch → new cycle
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, debug_span, error, field, warn};

use crate::config::EffectsConfig;
use crate::core::{Action, CycleId, Effect};
use crate::dispatch::{CycleLock, Dispatch, DispatchTarget};
use crate::error::PetuxError;
use crate::handler::Handler;
use crate::perform::{perform_all, EffectReporter, PerformOptions, TracingReporter};
use crate::reducer::{lift, Reducer};
use crate::schedule::{InflightTracker, Scheduler, Task, TokioScheduler};
use crate::sink::{Batch, EffectSink, Emit};
use crate::store::{Store, SubscriptionId};

type MakeStore<S, A, E> = Box<dyn FnOnce(S, Emit<E>) -> Store<S, A> + Send>;

/// Builder for [`EffectStore`].
///
/// ```
/// use petux_core::{handler_fn, reducer_fn, Dispatch, EffectStore, Emit, ManualScheduler};
///
/// #[derive(Debug)]
/// enum Action { Ping }
/// #[derive(Debug)]
/// enum Effect { Pong }
///
/// let scheduler = ManualScheduler::new();
/// let store = EffectStore::builder(0u32)
///     .with_reducer(reducer_fn(|n: &u32, _: &Action, emit: &Emit<Effect>| {
///         emit.emit(Effect::Pong);
///         Ok(n + 1)
///     }))
///     .with_handler(handler_fn(|_: &Effect, _: &Dispatch<Action>| Ok(())))
///     .with_scheduler(scheduler.clone())
///     .build()
///     .unwrap();
///
/// store.dispatch(Action::Ping).unwrap();
/// assert_eq!(store.state(), 1);
/// assert_eq!(scheduler.run_until_idle(), 1);
/// ```
pub struct EffectStoreBuilder<S, A, E> {
    initial: S,
    config: EffectsConfig,
    sink: Option<Arc<EffectSink<E>>>,
    make_store: Option<MakeStore<S, A, E>>,
    handler: Option<Arc<dyn Handler<A, E>>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    reporter: Arc<dyn EffectReporter<E>>,
}

impl<S, A, E> EffectStoreBuilder<S, A, E>
where
    S: Clone + Send + 'static,
    A: Action,
    E: Effect,
{
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            config: EffectsConfig::default(),
            sink: None,
            make_store: None,
            handler: None,
            scheduler: None,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Set the configuration. Call before [`emit`](Self::emit): the sink
    /// takes its name and discard policy from the config current at that
    /// point.
    pub fn with_config(mut self, config: EffectsConfig) -> Self {
        self.config = config;
        self
    }

    /// The `emit` handle of the store being built.
    ///
    /// For reducers that capture `emit` at construction instead of using the
    /// one passed to them. Both write into the same sink.
    pub fn emit(&mut self) -> Emit<E> {
        self.sink_or_init().emitter()
    }

    pub fn with_reducer<R>(mut self, reducer: R) -> Self
    where
        R: Reducer<S, A, E>,
    {
        self.make_store = Some(Box::new(move |initial, emit| {
            Store::new(initial, lift(reducer, emit))
        }));
        self
    }

    pub fn with_handler<H>(mut self, handler: H) -> Self
    where
        H: Handler<A, E>,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Defaults to a [`TokioScheduler`] on the runtime `build` is called from.
    pub fn with_scheduler<T>(mut self, scheduler: T) -> Self
    where
        T: Scheduler,
    {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Defaults to [`TracingReporter`].
    pub fn with_reporter<R>(mut self, reporter: R) -> Self
    where
        R: EffectReporter<E>,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn build(mut self) -> Result<EffectStore<S, A, E>, PetuxError> {
        let sink = self.sink_or_init().clone();
        let Self {
            initial,
            config,
            make_store,
            handler,
            scheduler,
            reporter,
            ..
        } = self;

        let make_store = make_store.ok_or_else(|| PetuxError::MissingReducer(config.name.clone()))?;
        let handler = handler.ok_or_else(|| PetuxError::MissingHandler(config.name.clone()))?;
        let scheduler: Arc<dyn Scheduler> = match scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?),
        };
        let store = make_store(initial, sink.emitter());

        debug!(store = %config.name, "effect store built");

        let shared = Arc::new_cyclic(|this| Shared {
            config,
            store,
            sink,
            handler,
            reporter,
            scheduler,
            cycles: CycleLock::default(),
            inflight: InflightTracker::new(),
            next_cycle: AtomicU64::new(1),
            this: this.clone(),
        });
        Ok(EffectStore { shared })
    }

    fn sink_or_init(&mut self) -> &Arc<EffectSink<E>> {
        let config = &self.config;
        self.sink
            .get_or_insert_with(|| EffectSink::new(config.name.clone(), config.discard_policy))
    }
}

/// A state container whose reducers emit effects.
///
/// Cheap to clone; clones share the same state, sink and scheduler.
pub struct EffectStore<S, A, E> {
    shared: Arc<Shared<S, A, E>>,
}

impl<S, A, E> Clone for EffectStore<S, A, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S, A, E> EffectStore<S, A, E>
where
    S: Clone + Send + 'static,
    A: Action,
    E: Effect,
{
    pub fn builder(initial: S) -> EffectStoreBuilder<S, A, E> {
        EffectStoreBuilder::new(initial)
    }

    /// Run one dispatch cycle.
    ///
    /// On `Ok`, the state is committed and the cycle's effects are scheduled.
    /// On `Err(Transition)`, the state is unchanged and no effect of this
    /// cycle will ever be performed. `Err(NestedDispatch)` means this was
    /// called from inside a reducer.
    ///
    /// `Err(SchedulerClosed)` is the one error that comes after the commit:
    /// the new state stands and listeners have been notified, but the
    /// cycle's batch was dropped unperformed.
    pub fn dispatch(&self, action: A) -> Result<CycleId, PetuxError> {
        self.shared.run_cycle(action)
    }

    /// A dispatch handle, as handlers receive it.
    pub fn dispatcher(&self) -> Dispatch<A> {
        Dispatch::new(self.shared.clone())
    }

    /// Snapshot of the current state. Must not be called from a reducer.
    pub fn state(&self) -> S {
        self.shared.store.state()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        self.shared.store.with_state(f)
    }

    /// Register a listener, called with the committed state after each
    /// successful dispatch, once that dispatch's effects are scheduled.
    /// With a [`ManualScheduler`](crate::ManualScheduler) listeners always
    /// run before the effects do.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.shared.store.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.store.unsubscribe(id)
    }

    /// Swap the reducer. The new one is lifted over the same sink, so
    /// effects keep flowing to the same handler.
    pub fn replace_reducer<R>(&self, reducer: R)
    where
        R: Reducer<S, A, E>,
    {
        debug!(store = %self.shared.config.name, "reducer replaced");
        self.shared
            .store
            .replace_reducer(lift(reducer, self.shared.sink.emitter()));
    }

    /// The store's `emit` handle.
    pub fn emit(&self) -> Emit<E> {
        self.shared.sink.emitter()
    }

    /// Scheduled batches plus spawned effect tasks not yet finished.
    pub fn pending_effects(&self) -> usize {
        self.shared.inflight.pending()
    }

    /// Resolve once every scheduled batch has been performed and every task
    /// spawned through [`Dispatch::spawn`] has finished, including work
    /// triggered transitively by those.
    pub async fn settled(&self) {
        self.shared.inflight.settled().await;
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }
}

impl<S: fmt::Debug, A, E> fmt::Debug for EffectStore<S, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectStore")
            .field("name", &self.shared.config.name)
            .field("store", &self.shared.store)
            .field("pending_effects", &self.shared.inflight.pending())
            .finish()
    }
}

struct Shared<S, A, E> {
    config: EffectsConfig,
    store: Store<S, A>,
    sink: Arc<EffectSink<E>>,
    handler: Arc<dyn Handler<A, E>>,
    reporter: Arc<dyn EffectReporter<E>>,
    scheduler: Arc<dyn Scheduler>,
    cycles: CycleLock,
    inflight: Arc<InflightTracker>,
    next_cycle: AtomicU64,
    this: Weak<Self>,
}

impl<S, A, E> Shared<S, A, E>
where
    S: Clone + Send + 'static,
    A: Action,
    E: Effect,
{
    fn run_cycle(&self, action: A) -> Result<CycleId, PetuxError> {
        let span = debug_span!("dispatch", store = %self.config.name, cycle = field::Empty);
        let _entered = span.enter();

        let Some(guard) = self.cycles.enter() else {
            warn!(?action, "dispatch from inside a reducer rejected");
            return Err(PetuxError::NestedDispatch {
                store: self.config.name.clone(),
                action: format!("{action:?}"),
            });
        };
        let cycle = CycleId(self.next_cycle.fetch_add(1, Ordering::Relaxed));
        span.record("cycle", field::display(cycle));

        let queue = self.sink.open();
        if let Err(err) = self.store.commit(&action) {
            drop(queue);
            drop(guard);
            debug!(?action, error = %err, "transition failed, effects discarded");
            return Err(PetuxError::Transition(err));
        }
        let batch = queue.close(cycle);

        // Batches reach the scheduler in commit order, and each listener
        // sees the state its own commit produced.
        let scheduled = self.schedule(batch);
        let snapshot = self.store.has_listeners().then(|| self.store.state());
        drop(guard);

        if let Some(snapshot) = snapshot {
            self.store.notify_with(&snapshot);
        }
        scheduled.map(|()| cycle)
    }

    fn schedule(&self, batch: Batch<E>) -> Result<(), PetuxError> {
        let this = self.this.upgrade().ok_or(PetuxError::SchedulerClosed)?;
        let cycle = batch.cycle();
        let effects = batch.len();
        let ticket = self.inflight.begin();

        let task: Task = Box::new(move || {
            let _ticket = ticket;
            let span = debug_span!("perform", store = %this.config.name, cycle = %cycle);
            let _entered = span.enter();
            let options = PerformOptions {
                store: &this.config.name,
                catch_panics: this.config.catch_panics,
            };
            let dispatch = Dispatch::new(this.clone());
            perform_all(
                batch,
                this.handler.as_ref(),
                &dispatch,
                this.reporter.as_ref(),
                options,
            );
        });

        debug!(effects, "batch scheduled");
        self.scheduler.schedule(task).inspect_err(|err| {
            error!(effects, error = %err, "batch dropped: scheduler unavailable");
        })
    }
}

impl<S, A, E> DispatchTarget<A> for Shared<S, A, E>
where
    S: Clone + Send + 'static,
    A: Action,
    E: Effect,
{
    fn dispatch(&self, action: A) -> Result<CycleId, PetuxError> {
        self.run_cycle(action)
    }

    fn inflight(&self) -> &Arc<InflightTracker> {
        &self.inflight
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
