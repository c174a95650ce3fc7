//! The dispatch capability handed to handlers, and the cycle lock behind it.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tokio::runtime::Handle;
use tracing::{error, Instrument};

use crate::core::{lock, CycleId};
use crate::error::PetuxError;
use crate::schedule::InflightTracker;

/// What a [`Dispatch`] handle forwards to. Implemented by the effect store.
pub(crate) trait DispatchTarget<A>: Send + Sync {
    fn dispatch(&self, action: A) -> Result<CycleId, PetuxError>;
    fn inflight(&self) -> &Arc<InflightTracker>;
    fn name(&self) -> &str;
}

/// Dispatches actions into an effect store.
///
/// Every dispatch through this handle runs a full cycle: open a queue, run
/// the reducer, capture the queue, schedule its effects. Handlers receive
/// one of these, so actions they dispatch get their effects performed too.
pub struct Dispatch<A> {
    target: Arc<dyn DispatchTarget<A>>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("store", &self.target.name())
            .finish()
    }
}

impl<A: 'static> Dispatch<A> {
    pub(crate) fn new(target: Arc<dyn DispatchTarget<A>>) -> Self {
        Self { target }
    }

    /// Dispatch an action.
    ///
    /// Returns once the new state is committed and the cycle's effects are
    /// scheduled. Effects run later, never on this call stack.
    pub fn dispatch(&self, action: A) -> Result<CycleId, PetuxError> {
        self.target.dispatch(action)
    }

    /// Run asynchronous handler work on the current tokio runtime.
    ///
    /// The task counts towards [`EffectStore::settled`](crate::EffectStore::settled).
    /// An error returned by the task is logged; like any effect failure it
    /// never reaches a dispatcher.
    pub fn spawn<F>(&self, task: F) -> Result<(), PetuxError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| PetuxError::NoRuntime(e.to_string()))?;
        let ticket = self.target.inflight().begin();
        let store = self.target.name().to_string();
        let span = tracing::debug_span!("effect_task", store = %store);
        runtime.spawn(
            async move {
                let _ticket = ticket;
                if let Err(err) = task.await {
                    error!(store = %store, error = %err, "spawned effect task failed");
                }
            }
            .instrument(span),
        );
        Ok(())
    }
}

/// Serializes dispatch cycles and rejects nested ones.
///
/// A cycle holds `turn` from OPEN to CLOSE. `owner` records which thread
/// holds it, so a reducer dispatching on its own thread gets an error
/// instead of deadlocking.
#[derive(Default)]
pub(crate) struct CycleLock {
    owner: Mutex<Option<ThreadId>>,
    turn: Mutex<()>,
}

impl CycleLock {
    /// Enter a cycle, blocking while another thread is inside one.
    ///
    /// `None` means the calling thread is already inside a cycle.
    pub(crate) fn enter(&self) -> Option<CycleGuard<'_>> {
        let current = thread::current().id();
        if *lock(&self.owner) == Some(current) {
            return None;
        }
        let turn = lock(&self.turn);
        *lock(&self.owner) = Some(current);
        Some(CycleGuard {
            lock: self,
            _turn: turn,
        })
    }

    pub(crate) fn is_held(&self) -> bool {
        lock(&self.owner).is_some()
    }
}

pub(crate) struct CycleGuard<'a> {
    lock: &'a CycleLock,
    _turn: MutexGuard<'a, ()>,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.lock.owner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn same_thread_cannot_reenter() {
        let cycles = CycleLock::default();
        let guard = cycles.enter().expect("first entry");
        assert!(cycles.enter().is_none());
        drop(guard);
        assert!(cycles.enter().is_some());
    }

    #[test]
    fn other_threads_wait_their_turn() {
        let cycles = Arc::new(CycleLock::default());
        let entered = Arc::new(AtomicBool::new(false));
        let guard = cycles.enter().unwrap();

        let waiter = {
            let cycles = cycles.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                let _guard = cycles.enter().expect("another thread is not nested");
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert!(!cycles.is_held());
    }
}
