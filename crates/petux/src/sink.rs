//! The effect sink and the `emit` handle reducers write through.
//!
//! ```text
//!             ┌──────────── EffectSink ─────────────┐
//! Emit ─push─►│ Discard  ──open()──►  Queue(owner)  │
//!             │    ▲                      │         │
//!             │    └──── close()/drop ────┘         │
//!             └─────────────────────────────────────┘
//! ```
//!
//! The sink is the only shared mutable state of an effect store. It holds a
//! live queue for exactly the duration of one synchronous transition, and
//! `Discard` the rest of the time.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::DiscardPolicy;
use crate::core::{lock, CycleId, Effect};

type Effects<E> = SmallVec<[E; 4]>;

/// Effects emitted during one dispatch cycle, in emission order.
///
/// A batch is frozen: once captured it can only be consumed.
pub struct Batch<E> {
    cycle: CycleId,
    effects: Effects<E>,
}

impl<E> Batch<E> {
    pub(crate) fn new(cycle: CycleId, effects: impl IntoIterator<Item = E>) -> Self {
        Self {
            cycle,
            effects: effects.into_iter().collect(),
        }
    }

    /// The cycle that produced this batch.
    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.effects.iter()
    }
}

impl<E> IntoIterator for Batch<E> {
    type Item = E;
    type IntoIter = smallvec::IntoIter<[E; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.effects.into_iter()
    }
}

impl<E: fmt::Debug> fmt::Debug for Batch<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("cycle", &self.cycle)
            .field("effects", &self.effects)
            .finish()
    }
}

enum Slot<E> {
    Discard,
    Queue { owner: ThreadId, effects: Effects<E> },
}

/// The single accumulation target of a store.
pub struct EffectSink<E> {
    slot: Mutex<Slot<E>>,
    policy: DiscardPolicy,
    store: String,
}

impl<E: Effect> EffectSink<E> {
    pub(crate) fn new(store: impl Into<String>, policy: DiscardPolicy) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Discard),
            policy,
            store: store.into(),
        })
    }

    /// A cloneable `emit` handle writing into this sink.
    pub fn emitter(self: &Arc<Self>) -> Emit<E> {
        Emit {
            target: self.clone(),
        }
    }

    /// Whether a queue is currently open.
    pub fn is_open(&self) -> bool {
        matches!(*lock(&self.slot), Slot::Queue { .. })
    }

    /// Install a fresh queue owned by the calling thread.
    ///
    /// The returned guard reinstalls `Discard` when dropped, so a transition
    /// that errors or panics never leaves a queue behind.
    pub(crate) fn open(&self) -> OpenQueue<'_, E> {
        let mut slot = lock(&self.slot);
        if let Slot::Queue { effects, .. } = &*slot {
            // Only reachable if a previous guard was leaked.
            warn!(store = %self.store, dropped = effects.len(), "replacing a queue that was never closed");
        }
        *slot = Slot::Queue {
            owner: thread::current().id(),
            effects: SmallVec::new(),
        };
        OpenQueue {
            sink: self,
            closed: false,
        }
    }

    fn accept(&self, effect: E) {
        let reason = {
            let mut slot = lock(&self.slot);
            match &mut *slot {
                Slot::Queue { owner, effects } if *owner == thread::current().id() => {
                    effects.push(effect);
                    return;
                }
                Slot::Queue { .. } => "emitted from a thread outside the active cycle",
                Slot::Discard => "emitted outside a dispatch cycle",
            }
        };
        self.discard(effect, reason);
    }

    fn discard(&self, effect: E, reason: &'static str) {
        match self.policy {
            DiscardPolicy::Silent => {}
            DiscardPolicy::Debug => debug!(store = %self.store, ?effect, reason, "effect discarded"),
            DiscardPolicy::Warn => warn!(store = %self.store, ?effect, reason, "effect discarded"),
        }
    }
}

/// An open queue. Close it to capture the batch; drop it to abandon it.
pub(crate) struct OpenQueue<'a, E: Effect> {
    sink: &'a EffectSink<E>,
    closed: bool,
}

impl<E: Effect> OpenQueue<'_, E> {
    /// Capture the queue as a batch and reinstall `Discard`.
    pub(crate) fn close(mut self, cycle: CycleId) -> Batch<E> {
        self.closed = true;
        let previous = std::mem::replace(&mut *lock(&self.sink.slot), Slot::Discard);
        let effects = match previous {
            Slot::Queue { effects, .. } => effects,
            Slot::Discard => SmallVec::new(),
        };
        Batch { cycle, effects }
    }
}

impl<E: Effect> Drop for OpenQueue<'_, E> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let previous = std::mem::replace(&mut *lock(&self.sink.slot), Slot::Discard);
        if let Slot::Queue { effects, .. } = previous {
            if !effects.is_empty() {
                debug!(store = %self.sink.store, abandoned = effects.len(), "queue abandoned by failed transition");
            }
        }
    }
}

trait EmitTarget<E>: Send + Sync {
    fn push(&self, effect: E);
}

impl<E: Effect> EmitTarget<E> for EffectSink<E> {
    fn push(&self, effect: E) {
        self.accept(effect);
    }
}

struct Mapped<P, F> {
    parent: Emit<P>,
    map: F,
}

impl<C, P, F> EmitTarget<C> for Mapped<P, F>
where
    P: 'static,
    F: Fn(C) -> P + Send + Sync,
{
    fn push(&self, effect: C) {
        self.parent.emit((self.map)(effect));
    }
}

struct FnTarget<F>(F);

impl<E, F> EmitTarget<E> for FnTarget<F>
where
    F: Fn(E) + Send + Sync,
{
    fn push(&self, effect: E) {
        (self.0)(effect);
    }
}

/// Handle reducers use to emit effects.
///
/// An `Emit` points at a sink slot, not at a particular queue: whichever
/// queue is open when [`emit`](Emit::emit) is called receives the effect.
/// This makes it safe to capture an `Emit` when building reducers.
pub struct Emit<E> {
    target: Arc<dyn EmitTarget<E>>,
}

impl<E> Clone for Emit<E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<E> fmt::Debug for Emit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Emit")
    }
}

impl<E: 'static> Emit<E> {
    /// Queue an effect for the current dispatch cycle.
    pub fn emit(&self, effect: E) {
        self.target.push(effect);
    }

    /// An `Emit` for child effects that wraps them into this handle's type.
    ///
    /// Lets a reducer written against its own effect enum run under a root
    /// reducer with a wider one.
    pub fn map<C, F>(&self, map: F) -> Emit<C>
    where
        C: 'static,
        F: Fn(C) -> E + Send + Sync + 'static,
    {
        Emit {
            target: Arc::new(Mapped {
                parent: self.clone(),
                map,
            }),
        }
    }

    /// An `Emit` backed by an arbitrary function. Mostly for exercising
    /// reducers outside a store.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        Emit {
            target: Arc::new(FnTarget(f)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> Arc<EffectSink<&'static str>> {
        EffectSink::new("test", DiscardPolicy::Silent)
    }

    #[test]
    fn emit_outside_cycle_is_dropped() {
        let sink = sink();
        let emit = sink.emitter();
        emit.emit("early");

        let queue = sink.open();
        emit.emit("inside");
        let batch = queue.close(CycleId(1));

        emit.emit("late");
        assert_eq!(batch.into_iter().collect::<Vec<_>>(), vec!["inside"]);
        assert!(!sink.is_open());
    }

    #[test]
    fn emitter_captured_before_open_reaches_later_queue() {
        let sink = sink();
        let captured = sink.emitter();

        let first = sink.open();
        captured.emit("a");
        let first = first.close(CycleId(1));

        let second = sink.open();
        captured.emit("b");
        let second = second.close(CycleId(2));

        assert_eq!(first.iter().copied().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(second.iter().copied().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn dropped_queue_resets_to_discard() {
        let sink = sink();
        let emit = sink.emitter();
        {
            let _queue = sink.open();
            emit.emit("lost");
            assert!(sink.is_open());
        }
        assert!(!sink.is_open());

        let batch = sink.open().close(CycleId(2));
        assert!(batch.is_empty());
    }

    #[test]
    fn other_threads_cannot_write_into_open_queue() {
        let sink = sink();
        let emit = sink.emitter();
        let queue = sink.open();

        let remote = emit.clone();
        std::thread::spawn(move || remote.emit("foreign"))
            .join()
            .unwrap();
        emit.emit("local");

        let batch = queue.close(CycleId(1));
        assert_eq!(batch.iter().copied().collect::<Vec<_>>(), vec!["local"]);
    }

    #[test]
    fn mapped_emit_wraps_child_effects() {
        #[derive(Debug, PartialEq)]
        enum Root {
            Child(u32),
        }

        let sink: Arc<EffectSink<Root>> = EffectSink::new("test", DiscardPolicy::Silent);
        let child = sink.emitter().map(Root::Child);

        let queue = sink.open();
        child.emit(7);
        let batch = queue.close(CycleId(1));

        assert_eq!(batch.into_iter().collect::<Vec<_>>(), vec![Root::Child(7)]);
    }
}
