//! Deferred execution: the "next turn" effects run on.
//!
//! A [`Scheduler`] receives one task per dispatch cycle and must run tasks
//! in the order it received them, strictly after `schedule` returned.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::core::lock;
use crate::error::PetuxError;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on a later turn, first in first out.
pub trait Scheduler: Send + Sync + 'static {
    /// Queue `task`. Must not run it before returning.
    fn schedule(&self, task: Task) -> Result<(), PetuxError>;
}

/// Runs tasks on a dedicated tokio task, one at a time, yielding to the
/// runtime between them.
#[derive(Clone)]
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<Task>,
}

impl TokioScheduler {
    /// Start a worker on the runtime of the calling context.
    pub fn current() -> Result<Self, PetuxError> {
        let handle = Handle::try_current().map_err(|e| PetuxError::NoRuntime(e.to_string()))?;
        Ok(Self::with_handle(&handle))
    }

    /// Start a worker on the given runtime.
    ///
    /// The worker exits once every clone of the scheduler is dropped and the
    /// queue has drained.
    pub fn with_handle(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
                tokio::task::yield_now().await;
            }
            debug!("effect scheduler stopped");
        });
        Self { tx }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: Task) -> Result<(), PetuxError> {
        self.tx.send(task).map_err(|_| PetuxError::SchedulerClosed)
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// A scheduler whose turns are driven by the caller.
///
/// Nothing runs until [`turn`](ManualScheduler::turn) or
/// [`run_until_idle`](ManualScheduler::run_until_idle) is called, which makes
/// the point where effects run explicit. Clones share one queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting for a turn.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Run the oldest task. Returns `false` if there was none.
    pub fn turn(&self) -> bool {
        let task = lock(&self.queue).pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run turns until the queue is empty, including tasks scheduled by
    /// earlier turns. Returns how many turns ran.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.turn() {
            turns += 1;
        }
        turns
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, task: Task) -> Result<(), PetuxError> {
        lock(&self.queue).push_back(task);
        Ok(())
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Counts outstanding effect work: scheduled batches and spawned tasks.
#[derive(Debug, Default)]
pub struct InflightTracker {
    count: AtomicUsize,
    idle: Notify,
}

impl InflightTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one unit of work. It is finished when the ticket drops.
    pub fn begin(self: &Arc<Self>) -> InflightTicket {
        self.count.fetch_add(1, Ordering::AcqRel);
        InflightTicket {
            tracker: self.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once nothing is outstanding.
    pub async fn settled(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Outstanding work registered with an [`InflightTracker`].
#[derive(Debug)]
pub struct InflightTicket {
    tracker: Arc<InflightTracker>,
}

impl Drop for InflightTicket {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}
