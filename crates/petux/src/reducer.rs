//! Reducers that emit effects, and the lift that hides `emit` from the store.

use std::marker::PhantomData;

use anyhow::Result;

use crate::sink::Emit;
use crate::store::Reduce;

/// A state transition that may request effects: `(state, action, emit) -> state`.
///
/// Reducers stay pure apart from calling `emit`. Effects emitted during a
/// transition that returns an error are never performed.
///
/// Closures with the matching signature implement this trait:
///
/// ```
/// use petux_core::{Emit, Reducer};
///
/// #[derive(Debug)]
/// enum Effect { Log(String) }
///
/// let reducer = |count: &u32, action: &&str, emit: &Emit<Effect>| -> anyhow::Result<u32> {
///     emit.emit(Effect::Log(action.to_string()));
///     Ok(count + 1)
/// };
/// # fn assert_reducer<R: Reducer<u32, &'static str, Effect>>(_: &R) {}
/// # assert_reducer(&reducer);
/// ```
pub trait Reducer<S, A, E>: Send + Sync + 'static {
    fn reduce(&self, state: &S, action: &A, emit: &Emit<E>) -> Result<S>;
}

impl<S, A, E, F> Reducer<S, A, E> for F
where
    F: Fn(&S, &A, &Emit<E>) -> Result<S> + Send + Sync + 'static,
{
    fn reduce(&self, state: &S, action: &A, emit: &Emit<E>) -> Result<S> {
        self(state, action, emit)
    }
}

/// Pin down the signature of a reducer closure.
///
/// Closure parameters are not inferred from a blanket impl, so a bare
/// closure handed to a builder often needs annotations. Passing it through
/// this function supplies them.
pub fn reducer_fn<S, A, E, F>(f: F) -> F
where
    F: Fn(&S, &A, &Emit<E>) -> Result<S> + Send + Sync + 'static,
{
    f
}

/// A three-argument reducer bound to an `emit` handle.
///
/// The handle targets the sink slot, so the reducer writes into whichever
/// queue is open when the store runs it.
pub struct Lifted<R, E> {
    reducer: R,
    emit: Emit<E>,
}

impl<R, E> Lifted<R, E> {
    pub fn emitter(&self) -> &Emit<E> {
        &self.emit
    }
}

/// Turn `(state, action, emit) -> state` into `(state, action) -> state`.
pub fn lift<S, A, E, R>(reducer: R, emit: Emit<E>) -> Lifted<R, E>
where
    R: Reducer<S, A, E>,
{
    Lifted { reducer, emit }
}

impl<S, A, E, R> Reduce<S, A> for Lifted<R, E>
where
    R: Reducer<S, A, E>,
    E: 'static,
{
    fn reduce(&self, state: &S, action: &A) -> Result<S> {
        self.reducer.reduce(state, action, &self.emit)
    }
}

/// Combinators over reducers.
pub trait ReducerExt<S, A, E>: Reducer<S, A, E> + Sized {
    /// Run `self`, then `next` on the resulting state. Both write into the
    /// same cycle's queue, `self`'s effects first.
    fn then<R>(self, next: R) -> Then<Self, R>
    where
        R: Reducer<S, A, E>,
    {
        Then { first: self, next }
    }
}

impl<S, A, E, R: Reducer<S, A, E>> ReducerExt<S, A, E> for R {}

pub struct Then<R1, R2> {
    first: R1,
    next: R2,
}

impl<S, A, E, R1, R2> Reducer<S, A, E> for Then<R1, R2>
where
    R1: Reducer<S, A, E>,
    R2: Reducer<S, A, E>,
{
    fn reduce(&self, state: &S, action: &A, emit: &Emit<E>) -> Result<S> {
        let state = self.first.reduce(state, action, emit)?;
        self.next.reduce(&state, action, emit)
    }
}

/// Run a reducer written against child effects `C` under a root emitting `E`.
///
/// ```
/// use petux_core::{map_effects, reducer_fn, Emit};
///
/// #[derive(Debug)]
/// enum Fetch { Posts(String) }
///
/// #[derive(Debug)]
/// enum AppEffect { Fetch(Fetch) }
///
/// let posts = reducer_fn(|n: &u32, _: &(), emit: &Emit<Fetch>| {
///     emit.emit(Fetch::Posts("rust".into()));
///     Ok(*n)
/// });
/// let root = map_effects(posts, AppEffect::Fetch);
/// # let _ = root;
/// ```
pub fn map_effects<S, A, C, E, R, F>(reducer: R, wrap: F) -> MapEffects<R, F, C>
where
    R: Reducer<S, A, C>,
    F: Fn(C) -> E + Clone + Send + Sync + 'static,
{
    MapEffects {
        reducer,
        wrap,
        _child: PhantomData,
    }
}

pub struct MapEffects<R, F, C> {
    reducer: R,
    wrap: F,
    _child: PhantomData<fn(C)>,
}

impl<S, A, C, E, R, F> Reducer<S, A, E> for MapEffects<R, F, C>
where
    R: Reducer<S, A, C>,
    F: Fn(C) -> E + Clone + Send + Sync + 'static,
    C: 'static,
    E: 'static,
{
    fn reduce(&self, state: &S, action: &A, emit: &Emit<E>) -> Result<S> {
        let child = emit.map(self.wrap.clone());
        self.reducer.reduce(state, action, &child)
    }
}

/// Run a reducer over one part of the state.
///
/// `get` picks the part out, `reducer` transitions it, `set` puts the result
/// back into a copy of the whole. Several slices chained with
/// [`then`](ReducerExt::then) give each part of the state its own reducer,
/// all emitting into the same cycle.
///
/// ```
/// use petux_core::{reducer_fn, slice, Emit, ReducerExt};
///
/// #[derive(Debug, Clone, Default)]
/// struct App { selected: String, visits: u32 }
///
/// let selected = slice(
///     |app: &App| &app.selected,
///     |app: &App, selected| App { selected, ..app.clone() },
///     reducer_fn(|_: &String, a: &&str, _: &Emit<()>| Ok(a.to_string())),
/// );
/// let visits = slice(
///     |app: &App| &app.visits,
///     |app: &App, visits| App { visits, ..app.clone() },
///     reducer_fn(|n: &u32, _: &&str, _: &Emit<()>| Ok(n + 1)),
/// );
/// let root = selected.then(visits);
/// # let _ = root;
/// ```
pub fn slice<S, T, A, E, R, G, P>(get: G, set: P, reducer: R) -> Slice<R, G, P, T>
where
    R: Reducer<T, A, E>,
    G: Fn(&S) -> &T + Send + Sync + 'static,
    P: Fn(&S, T) -> S + Send + Sync + 'static,
{
    Slice {
        reducer,
        get,
        set,
        _part: PhantomData,
    }
}

pub struct Slice<R, G, P, T> {
    reducer: R,
    get: G,
    set: P,
    _part: PhantomData<fn() -> T>,
}

impl<S, T, A, E, R, G, P> Reducer<S, A, E> for Slice<R, G, P, T>
where
    T: 'static,
    R: Reducer<T, A, E>,
    G: Fn(&S) -> &T + Send + Sync + 'static,
    P: Fn(&S, T) -> S + Send + Sync + 'static,
{
    fn reduce(&self, state: &S, action: &A, emit: &Emit<E>) -> Result<S> {
        let part = self.reducer.reduce((self.get)(state), action, emit)?;
        Ok((self.set)(state, part))
    }
}
