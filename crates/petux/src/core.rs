//! Core marker traits and identifiers.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An action: a fact describing something that happened.
///
/// Actions are consumed by reducers. They carry no behavior of their own.
///
/// Auto-implemented for every `Debug + Send + 'static` type.
pub trait Action: fmt::Debug + Send + 'static {}

impl<T> Action for T where T: fmt::Debug + Send + 'static {}

/// An effect: a request for a side effect, described as a value.
///
/// Reducers emit effects, handlers perform them after the reducer's state
/// has been committed. `Debug` is required so failures can be reported
/// alongside the offending effect.
///
/// Auto-implemented for every `Debug + Send + 'static` type.
pub trait Effect: fmt::Debug + Send + 'static {}

impl<T> Effect for T where T: fmt::Debug + Send + 'static {}

/// Identifies one dispatch cycle of a store.
///
/// Cycle ids increase monotonically per store, so a batch from a later
/// dispatch always carries a larger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(pub(crate) u64);

impl CycleId {
    /// Raw numeric value of the id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lock a mutex, recovering from poisoning.
///
/// Every mutex in this crate guards data that is only replaced after the
/// fallible work finished, so a poisoned guard still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
