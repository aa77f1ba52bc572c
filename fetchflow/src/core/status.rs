//! Run state machine for a pipeline execution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of one pipeline run.
///
/// `Start → FetchingIdentifiers → FetchingRecords → Completed`, with `Failed`
/// reachable only from `FetchingIdentifiers` and `Cancelled` from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run created, nothing executed yet.
    #[default]
    Start,
    /// Stage A is listing identifiers.
    FetchingIdentifiers,
    /// Stage B is fetching records.
    FetchingRecords,
    /// All identifiers processed.
    Completed,
    /// Stage A gave up.
    Failed,
    /// Cancellation observed at a suspension point.
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::FetchingIdentifiers => write!(f, "fetching_identifiers"),
            Self::FetchingRecords => write!(f, "fetching_records"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunState {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::FetchingIdentifiers)
                | (Self::FetchingIdentifiers, Self::FetchingRecords | Self::Failed)
                | (Self::FetchingRecords, Self::Completed)
                | (
                    Self::Start | Self::FetchingIdentifiers | Self::FetchingRecords,
                    Self::Cancelled
                )
        )
    }
}

/// An attempted transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal run transition {from} -> {to}")]
pub struct IllegalTransition {
    /// Current state.
    pub from: RunState,
    /// Requested state.
    pub to: RunState,
}

/// Tracks the current state and the path taken to reach it.
#[derive(Debug, Clone)]
pub struct RunStateMachine {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    /// Creates a machine in `Start`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RunState::Start,
            history: vec![RunState::Start],
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Every state visited, including the current one.
    #[must_use]
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Moves to `next` if the transition is legal.
    pub fn advance(&mut self, next: RunState) -> Result<RunState, IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        self.history.push(next);
        Ok(previous)
    }
}
