//! Error types.
//!
//! Two fault domains exist and they never mix:
//!
//! - Transition faults surface synchronously from `dispatch` as [`PetuxError`].
//! - Effect faults are captured per effect as [`EffectOutcome`](crate::EffectOutcome)
//!   and routed to an [`EffectReporter`](crate::EffectReporter). They never reach
//!   the dispatch caller.

use thiserror::Error;

/// Errors returned by store construction and dispatch.
#[derive(Debug, Error)]
pub enum PetuxError {
    /// A reducer tried to dispatch while its own transition was still running.
    ///
    /// Allowing this would open a second queue over the first one, so it is
    /// rejected. Dispatch from a handler instead.
    #[error("nested dispatch of {action} while a transition is in progress on store '{store}'")]
    NestedDispatch { store: String, action: String },

    /// The reducer returned an error. The cycle's effects were discarded.
    #[error("state transition failed: {0}")]
    Transition(#[source] anyhow::Error),

    /// `build()` was called without a reducer.
    #[error("effect store '{0}' has no reducer")]
    MissingReducer(String),

    /// `build()` was called without a handler.
    #[error("effect store '{0}' has no effect handler")]
    MissingHandler(String),

    /// A tokio runtime was needed but none is running on this thread.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// The scheduler's worker has shut down and no longer accepts tasks.
    ///
    /// Returned from `dispatch` after the state was committed; only the
    /// batch is lost.
    #[error("scheduler is closed")]
    SchedulerClosed,

    /// Configuration could not be parsed.
    #[error("invalid effects configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl PetuxError {
    /// Whether the error came from the reducer itself rather than the machinery.
    pub fn is_transition(&self) -> bool {
        matches!(self, PetuxError::Transition(_))
    }
}
