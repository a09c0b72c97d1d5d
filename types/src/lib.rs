//! Core domain types for proofview.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything the info pipeline hands to the view layer is defined here.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod display;
mod goals;
mod position;
mod settings;
mod version;

pub use diagnostic::{Diagnostic, DiagnosticSeverity};
pub use display::{DisplayState, FetchResult, FetchStatus, InfoSnapshot, ViewKind};
pub use goals::{
    CodeText, Goal, GoalList, Hypothesis, PlainGoal, PlainTermGoal, TermGoal, WidgetInstance,
};
pub use position::{LineCol, Position, Range};
pub use settings::{
    DEFAULT_FAST_DELAY, DEFAULT_SLOW_DELAY, RpcSettings, SchedulerSettings, ServerConfig,
    ServerConfigError,
};
pub use version::{ProtocolPreference, ProtocolVersion, ServerVersion, ServerVersionError};
