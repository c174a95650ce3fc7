//! Effect handlers.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::dispatch::Dispatch;

/// Performs effects. May dispatch further actions.
///
/// A handler is called once per emitted effect, after the emitting
/// transition has committed. Returning an error (or panicking) marks that
/// one effect as failed; the rest of the batch still runs.
///
/// Long-running work belongs in [`Dispatch::spawn`], which keeps the
/// performer moving and lets [`EffectStore::settled`](crate::EffectStore::settled)
/// account for it.
pub trait Handler<A, E>: Send + Sync + 'static {
    fn perform(&self, effect: &E, dispatch: &Dispatch<A>) -> Result<()>;
}

impl<A, E, F> Handler<A, E> for F
where
    F: Fn(&E, &Dispatch<A>) -> Result<()> + Send + Sync + 'static,
{
    fn perform(&self, effect: &E, dispatch: &Dispatch<A>) -> Result<()> {
        self(effect, dispatch)
    }
}

/// Pin down the signature of a handler closure.
pub fn handler_fn<A, E, F>(f: F) -> F
where
    F: Fn(&E, &Dispatch<A>) -> Result<()> + Send + Sync + 'static,
{
    f
}

/// An effect that carries its own behavior.
///
/// Instead of describing the work as data and matching on it in a handler,
/// a reducer can emit a `Thunk` and let [`perform_with`] run it.
pub struct Thunk<A> {
    label: &'static str,
    run: Arc<dyn Fn(&Dispatch<A>) -> Result<()> + Send + Sync>,
}

impl<A> Thunk<A> {
    /// `label` shows up in logs in place of the closure.
    pub fn new<F>(label: &'static str, run: F) -> Self
    where
        F: Fn(&Dispatch<A>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            label,
            run: Arc::new(run),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl<A> Clone for Thunk<A> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            run: self.run.clone(),
        }
    }
}

impl<A> fmt::Debug for Thunk<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thunk").field(&self.label).finish()
    }
}

/// Handler for [`Thunk`] effects: runs each one with the store's dispatch.
pub fn perform_with<A: 'static>() -> PerformWith<A> {
    PerformWith(std::marker::PhantomData)
}

pub struct PerformWith<A>(std::marker::PhantomData<fn(A)>);

impl<A: 'static> Handler<A, Thunk<A>> for PerformWith<A> {
    fn perform(&self, effect: &Thunk<A>, dispatch: &Dispatch<A>) -> Result<()> {
        (effect.run)(dispatch)
    }
}
