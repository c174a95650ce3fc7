//! The plain state container effect stores are layered on.
//!
//! A `Store` knows nothing about effects: it holds state, runs a two-argument
//! reducer and tells listeners about commits. The effect machinery reaches it
//! only through [`Lifted`](crate::Lifted) reducers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::core::lock;

/// A state transition without effects: `(state, action) -> state`.
pub trait Reduce<S, A>: Send + Sync + 'static {
    fn reduce(&self, state: &S, action: &A) -> Result<S>;
}

impl<S, A, F> Reduce<S, A> for F
where
    F: Fn(&S, &A) -> Result<S> + Send + Sync + 'static,
{
    fn reduce(&self, state: &S, action: &A) -> Result<S> {
        self(state, action)
    }
}

/// Handle returned by [`Store::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// State plus a replaceable reducer plus listeners.
pub struct Store<S, A> {
    state: Mutex<S>,
    reducer: Mutex<Arc<dyn Reduce<S, A>>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener<S>)>>,
    next_listener: AtomicU64,
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + 'static,
    A: 'static,
{
    pub fn new<R: Reduce<S, A>>(initial: S, reducer: R) -> Self {
        Self {
            state: Mutex::new(initial),
            reducer: Mutex::new(Arc::new(reducer)),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Run the reducer and commit the new state.
    ///
    /// The state is only replaced when the reducer succeeds. Listeners are
    /// not notified here; call [`notify`](Store::notify) once the caller is
    /// done with its own bookkeeping.
    pub fn commit(&self, action: &A) -> Result<()> {
        let reducer = lock(&self.reducer).clone();
        let mut state = lock(&self.state);
        let next = reducer.reduce(&state, action)?;
        *state = next;
        Ok(())
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> S {
        lock(&self.state).clone()
    }

    /// Run `f` against the current state without cloning it.
    ///
    /// `f` must not dispatch.
    pub fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
        f(&lock(&self.state))
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn has_listeners(&self) -> bool {
        !lock(&self.listeners).is_empty()
    }

    /// Call every listener with a snapshot of the current state.
    ///
    /// No lock is held while listeners run, so they may dispatch, subscribe
    /// or unsubscribe.
    pub fn notify(&self) {
        if self.has_listeners() {
            self.notify_with(&self.state());
        }
    }

    /// Call every listener with `snapshot`, taken by the caller right after
    /// its own commit. Later commits do not leak into it.
    pub fn notify_with(&self, snapshot: &S) {
        let listeners: Vec<Listener<S>> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    pub fn replace_reducer<R: Reduce<S, A>>(&self, reducer: R) {
        *lock(&self.reducer) = Arc::new(reducer);
    }
}

impl<S: fmt::Debug, A> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &*lock(&self.state))
            .field("listeners", &lock(&self.listeners).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Store<i64, i64> {
        Store::new(0, |state: &i64, delta: &i64| -> Result<i64> {
            if *delta == 0 {
                bail!("zero delta");
            }
            Ok(state + delta)
        })
    }

    #[test]
    fn failed_reduce_keeps_previous_state() {
        let store = counter();
        store.commit(&5).unwrap();
        assert!(store.commit(&0).is_err());
        assert_eq!(store.state(), 5);
    }

    #[test]
    fn listeners_see_committed_state_and_can_unsubscribe() {
        let store = counter();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = store.subscribe(move |state| sink.lock().unwrap().push(*state));

        store.commit(&2).unwrap();
        store.notify();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.commit(&3).unwrap();
        store.notify();

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn replaced_reducer_applies_to_next_commit() {
        let store = counter();
        store.commit(&1).unwrap();
        store.replace_reducer(|state: &i64, delta: &i64| -> Result<i64> { Ok(state * delta) });
        store.commit(&10).unwrap();
        assert_eq!(store.state(), 10);
    }

    #[test]
    fn notify_without_listeners_is_cheap() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counter();
        store.notify();
        let counted = calls.clone();
        store.subscribe(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        store.notify();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
