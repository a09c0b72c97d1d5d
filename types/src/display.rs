//! The state the view layer reads.
//!
//! [`DisplayState`] is a value: every change produces a whole new state, so a
//! reader holding one can never observe fields from two different fetch
//! cycles.

use serde::{Deserialize, Serialize};

use crate::diagnostic::Diagnostic;
use crate::goals::{GoalList, TermGoal, WidgetInstance};
use crate::position::Position;

/// Completion status of the info shown for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Nothing has been fetched yet.
    Loading,
    /// A previous result is shown while a newer cycle is in flight.
    Updating,
    Error,
    Ready,
}

/// How the tracked position is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    /// Follows the editor cursor.
    Cursor,
    /// Held at a fixed position.
    Pinned,
}

/// Everything one successful fetch cycle produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoSnapshot {
    pub goals: Option<GoalList>,
    pub term_goal: Option<TermGoal>,
    pub widgets: Option<Vec<WidgetInstance>>,
    pub messages: Vec<Diagnostic>,
}

/// Result fields of one fetch cycle plus its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub goals: Option<GoalList>,
    pub term_goal: Option<TermGoal>,
    pub widgets: Option<Vec<WidgetInstance>>,
    pub messages: Vec<Diagnostic>,
    pub error: Option<String>,
    pub status: FetchStatus,
}

impl FetchResult {
    #[must_use]
    pub fn loading() -> Self {
        Self {
            goals: None,
            term_goal: None,
            widgets: None,
            messages: Vec::new(),
            error: None,
            status: FetchStatus::Loading,
        }
    }

    #[must_use]
    pub fn ready(snapshot: InfoSnapshot) -> Self {
        Self {
            goals: snapshot.goals,
            term_goal: snapshot.term_goal,
            widgets: snapshot.widgets,
            messages: snapshot.messages,
            error: None,
            status: FetchStatus::Ready,
        }
    }

    /// An error replaces every result field so stale goals are never shown
    /// next to a new error.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            status: FetchStatus::Error,
            ..Self::loading()
        }
    }
}

/// The last committed result for one tracked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayState {
    kind: ViewKind,
    position: Option<Position>,
    generation: u64,
    paused: bool,
    result: FetchResult,
}

impl DisplayState {
    /// Initial state of a freshly mounted view: loading, no position.
    #[must_use]
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            position: None,
            generation: 0,
            paused: false,
            result: FetchResult::loading(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Position of the cycle that produced the current result.
    #[must_use]
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[must_use]
    pub fn result(&self) -> &FetchResult {
        &self.result
    }

    #[must_use]
    pub fn status(&self) -> FetchStatus {
        self.result.status
    }

    /// Replace the position and every result field in one step.
    #[must_use]
    pub fn committed(self, position: Position, generation: u64, result: FetchResult) -> Self {
        Self {
            position: Some(position),
            generation,
            result,
            ..self
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: FetchStatus) -> Self {
        self.result.status = status;
        self
    }

    /// Drop the error message; everything else stays.
    #[must_use]
    pub fn without_error(mut self, status: FetchStatus) -> Self {
        self.result.error = None;
        self.result.status = status;
        self
    }

    #[must_use]
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Plain-text rendering of the visible goals, falling back to the term goal.
    #[must_use]
    pub fn goals_text(&self) -> Option<String> {
        if let Some(goals) = &self.result.goals {
            return Some(goals.to_plain());
        }
        self.result
            .term_goal
            .as_ref()
            .map(|term| term.goal.to_plain())
    }
}
