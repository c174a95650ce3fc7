//! # Petux
//!
//! Deferred effects for action-driven state containers: reducers stay pure
//! and *describe* side effects, handlers *perform* them once the new state
//! has been committed.
//!
//! ## Core Concepts
//!
//! Petux separates **transitions** from **effects**:
//! - [`Action`] = what happened (input to a reducer)
//! - [`Effect`] = what should be done about it (output of a reducer)
//!
//! A reducer has the shape `(state, action, emit) -> state`. Calling
//! [`Emit::emit`] does nothing but append a value to the current dispatch
//! cycle's queue. A [`Handler`] performs those values later and may dispatch
//! new actions.
//!
//! ## Architecture
//!
//! ```text
//! caller ── dispatch(action) ──► EffectStore
//!                                   │
//!                  OPEN   sink ◄── new queue
//!                  RUN    Store.commit ─► Lifted(reducer)(state, action, emit)
//!                                                  │
//!                                        emit(e) ──┘ appends to queue
//!                  CLOSE  batch ◄── queue, sink ◄── Discard
//!                  SCHEDULE  Scheduler ◄── perform_all(batch)
//!                                   │
//!                         (later turn)
//!                                   ▼
//!                         Handler.perform(e, dispatch) ──► dispatch(next action)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One live queue** - it exists only while one reducer call runs
//! 2. **Captured on return** - the queue is frozen and the sink reset to
//!    `Discard` before anything asynchronous happens
//! 3. **Ordered, exactly once** - effects run in emission order, once each,
//!    after the emitting transition committed
//! 4. **Failed transitions emit nothing** - their queue is dropped unseen
//! 5. **Failed effects are isolated** - reported, never propagated, never
//!    stopping the rest of the batch
//! 6. **No nested dispatch** - a reducer dispatching on its own thread gets
//!    [`PetuxError::NestedDispatch`]
//!
//! ## Guarantees
//!
//! - **At-most-once**: an effect is never performed twice
//! - **In-memory only**: effects scheduled but not yet performed are lost
//!   if the process exits
//! - **No retry**: a handler that wants one dispatches a failure action and
//!   lets a reducer decide
//!
//! ## Example
//!
//! ```
//! use petux_core::{handler_fn, reducer_fn, Dispatch, EffectStore, Emit, ManualScheduler};
//!
//! #[derive(Debug, Clone, Default)]
//! struct UserState {
//!     is_fetching: bool,
//!     name: Option<String>,
//! }
//!
//! #[derive(Debug)]
//! enum Action {
//!     LoadUser(String),
//!     UserSuccess(String),
//! }
//!
//! #[derive(Debug)]
//! enum Effect {
//!     FetchUser(String),
//! }
//!
//! let reducer = reducer_fn(|state: &UserState, action: &Action, emit: &Emit<Effect>| {
//!     Ok(match action {
//!         Action::LoadUser(login) => {
//!             emit.emit(Effect::FetchUser(login.clone()));
//!             UserState { is_fetching: true, ..state.clone() }
//!         }
//!         Action::UserSuccess(name) => UserState {
//!             is_fetching: false,
//!             name: Some(name.clone()),
//!         },
//!     })
//! });
//!
//! let handler = handler_fn(|effect: &Effect, dispatch: &Dispatch<Action>| {
//!     let Effect::FetchUser(login) = effect;
//!     dispatch.dispatch(Action::UserSuccess(login.to_uppercase()))?;
//!     Ok(())
//! });
//!
//! let scheduler = ManualScheduler::new();
//! let store = EffectStore::builder(UserState::default())
//!     .with_reducer(reducer)
//!     .with_handler(handler)
//!     .with_scheduler(scheduler.clone())
//!     .build()
//!     .unwrap();
//!
//! store.dispatch(Action::LoadUser("alice".into())).unwrap();
//! assert!(store.state().is_fetching);
//!
//! scheduler.run_until_idle();
//! assert_eq!(store.state().name.as_deref(), Some("ALICE"));
//! ```
//!
//! ## What Petux is NOT
//!
//! - A persistent job queue
//! - An actor framework
//! - A replacement for the application's own state design
//!
//! Petux **is**:
//! > A scheduling layer that keeps reducers pure and runs what they ask for,
//! > in order, after they commit.

// Core modules
mod config;
mod core;
mod dispatch;
mod engine;
mod error;
mod handler;
mod perform;
mod reducer;
mod schedule;
mod sink;
mod store;

// Stress tests (test-only)
#[cfg(test)]
mod stress_tests;


// Re-export core traits
pub use crate::core::{Action, CycleId, Effect};

// Re-export error types
pub use crate::error::PetuxError;

// Re-export configuration
pub use config::{DiscardPolicy, EffectsConfig};

// Re-export sink types
pub use sink::{Batch, EffectSink, Emit};

// Re-export reducer types
pub use reducer::{
    lift, map_effects, reducer_fn, slice, Lifted, MapEffects, Reducer, ReducerExt, Slice, Then,
};

// Re-export store primitive
pub use store::{Reduce, Store, SubscriptionId};

// Re-export handler types
pub use handler::{handler_fn, perform_with, Handler, PerformWith, Thunk};

// Re-export performer types
pub use perform::{BatchOutcome, EffectFailure, EffectOutcome, EffectReporter, TracingReporter};

// Re-export scheduler types
pub use schedule::{InflightTicket, InflightTracker, ManualScheduler, Scheduler, Task, TokioScheduler};

// Re-export dispatch types
pub use dispatch::Dispatch;

// Re-export engine types (primary entry point)
pub use engine::{EffectStore, EffectStoreBuilder};
